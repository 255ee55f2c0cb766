use caseflow_core::config::DeliveryConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::sender::{ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId};

#[derive(Debug, Serialize)]
struct WhatsappRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WhatsappResponse {
    messages: Vec<WhatsappMessageRef>,
}

#[derive(Debug, Deserialize)]
struct WhatsappMessageRef {
    id: String,
}

pub struct WhatsappSender {
    client: reqwest::Client,
    api_url: Option<String>,
    token: Option<String>,
    phone_id: Option<String>,
}

impl WhatsappSender {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.whatsapp_api_url.clone(),
            token: config.whatsapp_api_token.clone(),
            phone_id: config.whatsapp_phone_id.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ChannelSender for WhatsappSender {
    async fn send(
        &self,
        message: &OutboundMessage,
    ) -> Result<ProviderMessageId, DeliveryFailure> {
        let (api_url, token, phone_id) = match (&self.api_url, &self.token, &self.phone_id) {
            (Some(u), Some(t), Some(p)) => (u, t, p),
            _ => {
                return Err(DeliveryFailure::Misconfigured(
                    "WhatsApp API URL, token or phone id missing".into(),
                ))
            }
        };

        let request = WhatsappRequest {
            messaging_product: "whatsapp",
            to: &message.recipient_contact,
            message_type: "text",
            text: json!({ "body": message.body }),
        };

        let response = self
            .client
            .post(format!(
                "{}/{}/messages",
                api_url.trim_end_matches('/'),
                phone_id
            ))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("WhatsApp request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                DeliveryFailure::Rejected(format!("WhatsApp API {}: {}", status, detail))
            } else {
                DeliveryFailure::Transport(format!("WhatsApp API {}: {}", status, detail))
            });
        }

        let parsed: WhatsappResponse = response
            .json()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("bad WhatsApp response: {}", e)))?;

        let id = parsed
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| {
                DeliveryFailure::Transport("WhatsApp response contained no message id".into())
            })?;

        tracing::debug!(
            "WhatsApp message sent to {} (id {})",
            message.recipient_contact,
            id
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credentials_are_misconfigured() {
        let sender = WhatsappSender::new(&DeliveryConfig::default());
        let err = sender
            .send(&OutboundMessage {
                recipient_contact: "+77010000000".into(),
                subject: None,
                body: "hello".into(),
                html_body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryFailure::Misconfigured(_)));
    }
}
