use caseflow_core::config::DeliveryConfig;
use serde::{Deserialize, Serialize};

use crate::sender::{ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId};

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SmsResponse {
    message_id: String,
}

pub struct SmsSender {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    sender_id: Option<String>,
}

impl SmsSender {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.sms_api_url.clone(),
            api_key: config.sms_api_key.clone(),
            sender_id: config.sms_sender_id.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ChannelSender for SmsSender {
    async fn send(
        &self,
        message: &OutboundMessage,
    ) -> Result<ProviderMessageId, DeliveryFailure> {
        let (api_url, api_key) = match (&self.api_url, &self.api_key) {
            (Some(u), Some(k)) => (u, k),
            _ => {
                return Err(DeliveryFailure::Misconfigured(
                    "SMS gateway URL or API key missing".into(),
                ))
            }
        };

        let request = SmsRequest {
            to: &message.recipient_contact,
            message: &message.body,
            sender_id: self.sender_id.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/sms", api_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("SMS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                DeliveryFailure::Rejected(format!("SMS gateway {}: {}", status, detail))
            } else {
                DeliveryFailure::Transport(format!("SMS gateway {}: {}", status, detail))
            });
        }

        let parsed: SmsResponse = response
            .json()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("bad gateway response: {}", e)))?;

        tracing::debug!(
            "SMS sent to {} (gateway id {})",
            message.recipient_contact,
            parsed.message_id
        );
        Ok(parsed.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_gateway_is_misconfigured() {
        let sender = SmsSender::new(&DeliveryConfig::default());
        let err = sender
            .send(&OutboundMessage {
                recipient_contact: "+77010000000".into(),
                subject: None,
                body: "code 1234".into(),
                html_body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryFailure::Misconfigured(_)));
    }
}
