pub mod email;
pub mod push;
pub mod sender;
pub mod sms;
pub mod whatsapp;

pub use sender::{ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId, SenderRegistry};
