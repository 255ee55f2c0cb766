use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use caseflow_core::config::DeliveryConfig;
use caseflow_core::types::NotificationChannel;
use thiserror::Error;

use crate::{email::EmailSender, push::PushSender, sms::SmsSender, whatsapp::WhatsappSender};

pub type ProviderMessageId = String;

/// Rendered content handed to a channel sender. `subject` and
/// `html_body` only carry meaning for email.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub recipient_contact: String,
    pub subject: Option<String>,
    pub body: String,
    pub html_body: Option<String>,
}

/// Failure taxonomy for a single transport attempt. `Transport` is
/// the only retryable class; the other two exhaust the retry budget
/// immediately.
#[derive(Debug, Clone, Error)]
pub enum DeliveryFailure {
    #[error("channel not configured: {0}")]
    Misconfigured(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by provider: {0}")]
    Rejected(String),
}

impl DeliveryFailure {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeliveryFailure::Transport(_))
    }
}

#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage)
        -> Result<ProviderMessageId, DeliveryFailure>;
}

/// Channel -> sender mapping, resolved once at startup. The dispatch
/// engine never branches on the channel itself; it looks the sender
/// up here, which also lets tests register fakes per channel.
pub struct SenderRegistry {
    senders: HashMap<NotificationChannel, Arc<dyn ChannelSender>>,
    send_timeout: Duration,
}

impl SenderRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            senders: HashMap::new(),
            send_timeout,
        }
    }

    /// Production registry with the reference senders for every
    /// channel that has one. Telegram has no sender yet and stays
    /// unregistered.
    pub fn from_config(config: &DeliveryConfig) -> Self {
        let mut registry = Self::new(Duration::from_secs(config.send_timeout_secs));
        registry.register(NotificationChannel::Email, Arc::new(EmailSender::new(config)));
        registry.register(NotificationChannel::Sms, Arc::new(SmsSender::new(config)));
        registry.register(NotificationChannel::Push, Arc::new(PushSender::new(config)));
        registry.register(
            NotificationChannel::Whatsapp,
            Arc::new(WhatsappSender::new(config)),
        );
        registry
    }

    pub fn register(&mut self, channel: NotificationChannel, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(channel, sender);
    }

    pub fn supports(&self, channel: NotificationChannel) -> bool {
        self.senders.contains_key(&channel)
    }

    /// Runs the channel's sender under the configured timeout. An
    /// elapsed timeout is a transport failure; the attempt must not
    /// block its caller indefinitely.
    pub async fn dispatch(
        &self,
        channel: NotificationChannel,
        message: &OutboundMessage,
    ) -> Result<ProviderMessageId, DeliveryFailure> {
        let sender = self.senders.get(&channel).ok_or_else(|| {
            DeliveryFailure::Misconfigured(format!("no sender registered for {}", channel.as_str()))
        })?;

        match tokio::time::timeout(self.send_timeout, sender.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryFailure::Transport(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowSender;

    #[async_trait::async_trait]
    impl ChannelSender for SlowSender {
        async fn send(
            &self,
            _message: &OutboundMessage,
        ) -> Result<ProviderMessageId, DeliveryFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too-late".into())
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            recipient_contact: "a@b.kz".into(),
            subject: None,
            body: "hi".into(),
            html_body: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_transport_failure() {
        let mut registry = SenderRegistry::new(Duration::from_millis(100));
        registry.register(NotificationChannel::Email, Arc::new(SlowSender));

        let err = registry
            .dispatch(NotificationChannel::Email, &message())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryFailure::Transport(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn unregistered_channel_is_misconfigured() {
        let registry = SenderRegistry::new(Duration::from_secs(1));
        let err = registry
            .dispatch(NotificationChannel::Telegram, &message())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryFailure::Misconfigured(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn fatality_classes() {
        assert!(DeliveryFailure::Misconfigured("x".into()).is_fatal());
        assert!(DeliveryFailure::Rejected("x".into()).is_fatal());
        assert!(!DeliveryFailure::Transport("x".into()).is_fatal());
    }
}
