use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use caseflow_core::template;
use caseflow_core::types::{
    NewNotification, NewOutboxEntry, Notification, NotificationChannel, NotificationStatus,
    NotificationTemplate, NotificationType, UserNotificationSettings,
};
use caseflow_core::AppContext;
use caseflow_delivery::{OutboundMessage, SenderRegistry};

/// Payload for creating a notification. Lifecycle fields are owned by
/// the service; callers only describe what to say and to whom.
#[derive(Debug, Clone)]
pub struct SendNotificationRequest {
    pub recipient_id: i64,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub template_code: Option<String>,
    pub title: Option<String>,
    pub message: String,
    pub data: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub related_application_id: Option<i64>,
    pub related_document_id: Option<i64>,
}

impl SendNotificationRequest {
    pub fn new(
        recipient_id: i64,
        notification_type: NotificationType,
        channel: NotificationChannel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            notification_type,
            channel,
            template_code: None,
            title: None,
            message: message.into(),
            data: serde_json::json!({}),
            scheduled_at: None,
            related_application_id: None,
            related_document_id: None,
        }
    }
}

pub struct NotificationService {
    ctx: AppContext,
    senders: Arc<SenderRegistry>,
}

impl NotificationService {
    pub fn new(ctx: AppContext, senders: Arc<SenderRegistry>) -> Self {
        Self { ctx, senders }
    }

    /// Creates a notification and, when it is already due, pushes it
    /// through dispatch inline. Returns None when the recipient has
    /// opted out of the channel or category; that is a silent discard,
    /// not an error. Errors mean invalid usage or storage failure,
    /// never a delivery failure.
    pub async fn send_notification(
        &self,
        request: SendNotificationRequest,
    ) -> Result<Option<Notification>> {
        if !self.senders.supports(request.channel) {
            bail!(
                "no sender registered for channel {}",
                request.channel.as_str()
            );
        }

        let settings = self
            .ctx
            .repos
            .settings
            .get_or_create(request.recipient_id)
            .await?;
        if !settings.channel_enabled(request.channel)
            || !settings.category_enabled(request.notification_type.category())
        {
            tracing::debug!(
                "Recipient {} opted out of {} / {:?}, discarding notification",
                request.recipient_id,
                request.channel.as_str(),
                request.notification_type.category()
            );
            return Ok(None);
        }

        if let Some(code) = &request.template_code {
            if self.ctx.repos.templates.find_by_code(code).await?.is_none() {
                tracing::warn!("Notification template '{}' not found or inactive", code);
            }
        }

        let new = NewNotification {
            recipient_id: request.recipient_id,
            template_code: request.template_code,
            notification_type: request.notification_type,
            channel: request.channel,
            title: request.title,
            message: request.message,
            data: request.data,
            max_attempts: 3,
            scheduled_at: request.scheduled_at,
            related_application_id: request.related_application_id,
            related_document_id: request.related_document_id,
        };
        let notification = self.ctx.repos.notifications.insert(new).await?;

        if notification.is_due(Utc::now()) {
            if let Err(e) = self.dispatch(notification.id).await {
                tracing::error!(
                    "Inline dispatch of notification {} failed: {}",
                    notification.id,
                    e
                );
            }
            let refreshed = self
                .ctx
                .repos
                .notifications
                .find(notification.id)
                .await?
                .ok_or_else(|| anyhow!("notification {} vanished", notification.id))?;
            return Ok(Some(refreshed));
        }

        Ok(Some(notification))
    }

    /// Runs one delivery attempt for the notification. The claim is a
    /// compare-and-swap on PENDING, so concurrent callers (the sweeper
    /// and an inline send) cannot double-deliver; the loser returns
    /// without doing anything.
    pub async fn dispatch(&self, notification_id: i64) -> Result<()> {
        let now = Utc::now();
        let mut notification = match self
            .ctx
            .repos
            .notifications
            .claim_for_dispatch(notification_id)
            .await?
        {
            Some(n) => n,
            None => {
                tracing::debug!(
                    "Notification {} not claimable, skipping dispatch",
                    notification_id
                );
                return Ok(());
            }
        };

        // The claim must be released on every path. On a storage error
        // mid-attempt the row goes back to PENDING without charging an
        // attempt, so the sweeper can pick it up again.
        if let Err(e) = self.run_claimed(&mut notification, now).await {
            if notification.status == NotificationStatus::Sending {
                notification.status = NotificationStatus::Pending;
                notification.updated_at = Utc::now();
                if let Err(save_err) = self.ctx.repos.notifications.save(&notification).await {
                    tracing::error!(
                        "Notification {} left claimed: releasing the claim failed: {}",
                        notification.id,
                        save_err
                    );
                }
            }
            return Err(e);
        }

        Ok(())
    }

    async fn run_claimed(
        &self,
        notification: &mut Notification,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let settings = self
            .ctx
            .repos
            .settings
            .get_or_create(notification.recipient_id)
            .await?;

        // Preferences may have changed since the row was created.
        if !settings.channel_enabled(notification.channel)
            || !settings.category_enabled(notification.notification_type.category())
        {
            notification.status = NotificationStatus::Cancelled;
            notification.updated_at = now;
            self.ctx.repos.notifications.save(notification).await?;
            tracing::debug!(
                "Notification {} cancelled at dispatch: recipient opted out",
                notification.id
            );
            return Ok(());
        }

        if let Some(resume_at) = settings.deferred_until(now) {
            notification.status = NotificationStatus::Pending;
            notification.scheduled_at = Some(resume_at);
            notification.updated_at = now;
            self.ctx.repos.notifications.save(notification).await?;
            tracing::debug!(
                "Notification {} deferred until {} (quiet/work hours)",
                notification.id,
                resume_at
            );
            return Ok(());
        }

        // A recipient without a user row or without contact details for
        // the channel is a data error, not a transient one: retrying
        // cannot fix it, so the attempt fails fatally.
        let contact = self
            .ctx
            .repos
            .users
            .find(notification.recipient_id)
            .await?
            .and_then(|user| user.contact_for(notification.channel).map(|c| c.to_string()));
        let contact = match contact {
            Some(c) => c,
            None => {
                let error = format!(
                    "recipient {} has no contact for channel {}",
                    notification.recipient_id,
                    notification.channel.as_str()
                );
                self.record_attempt(notification, String::new(), None, Err(error.clone()), true, now)
                    .await?;
                tracing::warn!("Notification {} failed: {}", notification.id, error);
                return Ok(());
            }
        };

        let template = match &notification.template_code {
            Some(code) => self.ctx.repos.templates.find_by_code(code).await?,
            None => None,
        };
        let content = render_content(notification, template.as_ref());

        let message = OutboundMessage {
            recipient_contact: contact,
            subject: content.subject,
            body: content.body,
            html_body: content.html_body,
        };

        match self.senders.dispatch(notification.channel, &message).await {
            Ok(provider_id) => {
                tracing::info!(
                    "Notification {} sent via {} (provider id {})",
                    notification.id,
                    notification.channel.as_str(),
                    provider_id
                );
                self.record_attempt(
                    notification,
                    message.recipient_contact,
                    Some((message.subject, message.body, message.html_body)),
                    Ok(provider_id),
                    false,
                    now,
                )
                .await?;
            }
            Err(failure) => {
                tracing::warn!(
                    "Notification {} delivery attempt {} failed: {}",
                    notification.id,
                    notification.attempts + 1,
                    failure
                );
                self.record_attempt(
                    notification,
                    message.recipient_contact,
                    Some((message.subject, message.body, message.html_body)),
                    Err(failure.to_string()),
                    failure.is_fatal(),
                    now,
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Books the attempt outcome: one outbox row and the matching
    /// notification state change, in that order so an audit row exists
    /// even if the state save fails.
    async fn record_attempt(
        &self,
        notification: &mut Notification,
        recipient_contact: String,
        rendered: Option<(Option<String>, String, Option<String>)>,
        outcome: std::result::Result<String, String>,
        fatal: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (subject, body, html_body) = rendered.unwrap_or((None, String::new(), None));
        let entry = match &outcome {
            Ok(provider_id) => NewOutboxEntry {
                notification_id: notification.id,
                channel: notification.channel,
                recipient_contact,
                subject,
                body,
                html_body,
                provider_message_id: Some(provider_id.clone()),
                status: NotificationStatus::Sent,
                error_message: None,
                sent_at: Some(now),
            },
            Err(error) => NewOutboxEntry {
                notification_id: notification.id,
                channel: notification.channel,
                recipient_contact,
                subject,
                body,
                html_body,
                provider_message_id: None,
                status: NotificationStatus::Failed,
                error_message: Some(error.clone()),
                sent_at: None,
            },
        };
        self.ctx.repos.outbox.insert(entry).await?;

        match outcome {
            Ok(_) => notification.mark_sent(now),
            Err(error) => notification.record_failure(&error, fatal, now),
        }
        self.ctx.repos.notifications.save(notification).await?;
        Ok(())
    }

    pub async fn mark_as_read(&self, user_id: i64, notification_id: i64) -> Result<bool> {
        self.ctx
            .repos
            .notifications
            .mark_read(user_id, notification_id)
            .await
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64> {
        self.ctx.repos.notifications.unread_count(user_id).await
    }

    /// Provider delivery-confirmation hook (webhooks). Only a SENT
    /// notification can move to DELIVERED.
    pub async fn mark_delivered(&self, notification_id: i64) -> Result<bool> {
        let mut notification = self
            .ctx
            .repos
            .notifications
            .find(notification_id)
            .await?
            .ok_or_else(|| anyhow!("notification {} not found", notification_id))?;
        if !notification.mark_delivered(Utc::now()) {
            return Ok(false);
        }
        self.ctx.repos.notifications.save(&notification).await?;
        Ok(true)
    }

    /// Pre-dispatch cancellation. An in-flight attempt runs to
    /// completion; only a PENDING row can be cancelled.
    pub async fn cancel(&self, notification_id: i64) -> Result<bool> {
        let mut notification = self
            .ctx
            .repos
            .notifications
            .find(notification_id)
            .await?
            .ok_or_else(|| anyhow!("notification {} not found", notification_id))?;
        if !notification.cancel(Utc::now()) {
            return Ok(false);
        }
        self.ctx.repos.notifications.save(&notification).await?;
        Ok(true)
    }

    pub async fn list_for_recipient(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>> {
        self.ctx
            .repos
            .notifications
            .find_for_recipient(user_id, limit, offset)
            .await
    }

    pub async fn get_settings(&self, user_id: i64) -> Result<UserNotificationSettings> {
        self.ctx.repos.settings.get_or_create(user_id).await
    }

    pub async fn update_settings(&self, settings: &UserNotificationSettings) -> Result<()> {
        self.ctx.repos.settings.save(settings).await
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }
}

struct RenderedContent {
    subject: Option<String>,
    body: String,
    html_body: Option<String>,
}

/// Channel-specific content selection. Template fields win when the
/// template carries them; otherwise the notification's own title and
/// message are used verbatim.
fn render_content(
    notification: &Notification,
    template: Option<&NotificationTemplate>,
) -> RenderedContent {
    let data = &notification.data;
    let fallback_subject = notification.title.clone();
    let fallback_body = notification.message.clone();

    let Some(t) = template else {
        return RenderedContent {
            subject: fallback_subject,
            body: fallback_body,
            html_body: None,
        };
    };

    let render_opt = |field: &Option<String>| field.as_deref().map(|f| template::render(f, data));

    match notification.channel {
        NotificationChannel::Email => RenderedContent {
            subject: render_opt(&t.email_subject).or(fallback_subject),
            body: render_opt(&t.email_body).unwrap_or(fallback_body),
            html_body: render_opt(&t.email_html),
        },
        NotificationChannel::Push => RenderedContent {
            subject: render_opt(&t.push_title).or(fallback_subject),
            body: render_opt(&t.push_body).unwrap_or(fallback_body),
            html_body: None,
        },
        NotificationChannel::Sms
        | NotificationChannel::Whatsapp
        | NotificationChannel::Telegram => RenderedContent {
            subject: None,
            body: render_opt(&t.sms_body).unwrap_or(fallback_body),
            html_body: None,
        },
    }
}
