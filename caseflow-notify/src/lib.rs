pub mod helpers;
pub mod service;

pub use service::{NotificationService, SendNotificationRequest};
