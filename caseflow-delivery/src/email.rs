use caseflow_core::config::DeliveryConfig;
use serde::{Deserialize, Serialize};

use crate::sender::{ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId};

const DEFAULT_API_URL: &str = "https://api.resend.com/emails";

/// Simple HTML escaping for the fallback body wrapper
fn html_escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct EmailRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    id: String,
}

pub struct EmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from_email: Option<String>,
}

impl EmailSender {
    pub fn new(config: &DeliveryConfig) -> Self {
        if config.email_api_key.is_none() || config.email_from.is_none() {
            tracing::warn!("Email sender missing credentials; email delivery will fail as misconfigured");
        }
        Self {
            client: reqwest::Client::new(),
            api_url: config
                .email_api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: config.email_api_key.clone(),
            from_email: config.email_from.clone(),
        }
    }

    fn wrap_html(subject: &str, body: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background-color: #f8f9fa; border-radius: 8px; padding: 24px;">
        <h1 style="margin: 0 0 16px 0; font-size: 24px; color: #212529;">{}</h1>
        <p style="margin: 0; font-size: 16px; color: #495057;">{}</p>
    </div>
</body>
</html>"#,
            html_escape(subject),
            html_escape(body)
        )
    }
}

#[async_trait::async_trait]
impl ChannelSender for EmailSender {
    async fn send(
        &self,
        message: &OutboundMessage,
    ) -> Result<ProviderMessageId, DeliveryFailure> {
        let (api_key, from_email) = match (&self.api_key, &self.from_email) {
            (Some(k), Some(f)) => (k, f),
            _ => {
                return Err(DeliveryFailure::Misconfigured(
                    "email API key or sender address missing".into(),
                ))
            }
        };

        let subject = message.subject.as_deref().unwrap_or("Notification");
        let html = match &message.html_body {
            Some(html) => html.clone(),
            None => Self::wrap_html(subject, &message.body),
        };

        let request = EmailRequest {
            from: from_email.clone(),
            to: vec![message.recipient_contact.clone()],
            subject: subject.to_string(),
            html,
            text: Some(message.body.clone()),
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("email request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                DeliveryFailure::Rejected(format!("email provider {}: {}", status, detail))
            } else {
                DeliveryFailure::Transport(format!("email provider {}: {}", status, detail))
            });
        }

        let parsed: EmailResponse = response
            .json()
            .await
            .map_err(|e| DeliveryFailure::Transport(format!("bad provider response: {}", e)))?;

        tracing::debug!(
            "Email sent to {} (provider id {})",
            message.recipient_contact,
            parsed.id
        );
        Ok(parsed.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(html_escape("<b>&\"'"), "&lt;b&gt;&amp;&quot;&#x27;");
        assert_eq!(html_escape("plain"), "plain");
    }

    #[tokio::test]
    async fn missing_credentials_are_misconfigured() {
        let sender = EmailSender::new(&DeliveryConfig::default());
        let err = sender
            .send(&OutboundMessage {
                recipient_contact: "a@b.kz".into(),
                subject: None,
                body: "hi".into(),
                html_body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryFailure::Misconfigured(_)));
    }
}
