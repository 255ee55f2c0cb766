use caseflow_core::config::DeliveryConfig;
use serde::{Deserialize, Serialize};

use crate::sender::{ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId};

const DEFAULT_API_URL: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    notification: PushPayload<'a>,
}

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    success: i64,
    #[serde(default)]
    multicast_id: i64,
}

pub struct PushSender {
    client: reqwest::Client,
    api_url: String,
    server_key: Option<String>,
}

impl PushSender {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config
                .push_api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            server_key: config.push_server_key.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ChannelSender for PushSender {
    async fn send(
        &self,
        message: &OutboundMessage,
    ) -> Result<ProviderMessageId, DeliveryFailure> {
        let server_key = self.server_key.as_ref().ok_or_else(|| {
            DeliveryFailure::Misconfigured("push server key missing".into())
        })?;

        let request = PushRequest {
            to: &message.recipient_contact,
            notification: PushPayload {
                title: message.subject.as_deref().unwrap_or("Notification"),
                body: &message.body,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("key={}", server_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("push request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                DeliveryFailure::Rejected(format!("push service {}: {}", status, detail))
            } else {
                DeliveryFailure::Transport(format!("push service {}: {}", status, detail))
            });
        }

        let parsed: PushResponse = response
            .json()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("bad push response: {}", e)))?;

        if parsed.success == 0 {
            return Err(DeliveryFailure::Rejected(
                "push service reported no successful deliveries".into(),
            ));
        }

        tracing::debug!(
            "Push sent to device (batch id {})",
            parsed.multicast_id
        );
        Ok(parsed.multicast_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_server_key_is_misconfigured() {
        let sender = PushSender::new(&DeliveryConfig::default());
        let err = sender
            .send(&OutboundMessage {
                recipient_contact: "device-token".into(),
                subject: Some("Title".into()),
                body: "body".into(),
                html_body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryFailure::Misconfigured(_)));
    }
}
