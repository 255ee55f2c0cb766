use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
    Whatsapp,
    Telegram,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Push => "push",
            NotificationChannel::Whatsapp => "whatsapp",
            NotificationChannel::Telegram => "telegram",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "email" => Ok(NotificationChannel::Email),
            "sms" => Ok(NotificationChannel::Sms),
            "push" => Ok(NotificationChannel::Push),
            "whatsapp" => Ok(NotificationChannel::Whatsapp),
            "telegram" => Ok(NotificationChannel::Telegram),
            other => Err(StoreError::invalid("channel", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ApplicationCreated,
    ApplicationStatusChanged,
    DocumentGenerated,
    DocumentSigned,
    DeadlineApproaching,
    Reminder,
    System,
    News,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ApplicationCreated => "application_created",
            NotificationType::ApplicationStatusChanged => "application_status_changed",
            NotificationType::DocumentGenerated => "document_generated",
            NotificationType::DocumentSigned => "document_signed",
            NotificationType::DeadlineApproaching => "deadline_approaching",
            NotificationType::Reminder => "reminder",
            NotificationType::System => "system",
            NotificationType::News => "news",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "application_created" => Ok(NotificationType::ApplicationCreated),
            "application_status_changed" => Ok(NotificationType::ApplicationStatusChanged),
            "document_generated" => Ok(NotificationType::DocumentGenerated),
            "document_signed" => Ok(NotificationType::DocumentSigned),
            "deadline_approaching" => Ok(NotificationType::DeadlineApproaching),
            "reminder" => Ok(NotificationType::Reminder),
            "system" => Ok(NotificationType::System),
            "news" => Ok(NotificationType::News),
            other => Err(StoreError::invalid("notification_type", other)),
        }
    }

    pub fn category(&self) -> NotificationCategory {
        match self {
            NotificationType::ApplicationCreated | NotificationType::ApplicationStatusChanged => {
                NotificationCategory::Application
            }
            NotificationType::DocumentGenerated | NotificationType::DocumentSigned => {
                NotificationCategory::Document
            }
            NotificationType::DeadlineApproaching | NotificationType::Reminder => {
                NotificationCategory::Deadline
            }
            NotificationType::System => NotificationCategory::System,
            NotificationType::News => NotificationCategory::News,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Application,
    Document,
    Deadline,
    System,
    News,
}

/// Lifecycle: PENDING -> SENT -> DELIVERED -> READ, with FAILED and
/// CANCELLED as terminal side exits. SENDING is the transient
/// claim marker taken while a dispatch attempt is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sending" => Ok(NotificationStatus::Sending),
            "sent" => Ok(NotificationStatus::Sent),
            "delivered" => Ok(NotificationStatus::Delivered),
            "read" => Ok(NotificationStatus::Read),
            "failed" => Ok(NotificationStatus::Failed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            other => Err(StoreError::invalid("status", other)),
        }
    }

    /// Counted as unread in the recipient-facing badge.
    pub fn is_unread(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Pending | NotificationStatus::Sent | NotificationStatus::Delivered
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub template_code: Option<String>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub title: Option<String>,
    pub message: String,
    pub data: serde_json::Value,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub related_application_id: Option<i64>,
    pub related_document_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending
            && self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        self.error_message = None;
        self.updated_at = now;
    }

    /// Provider delivery confirmation. Only meaningful once the
    /// notification has actually gone out.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != NotificationStatus::Sent {
            return false;
        }
        self.status = NotificationStatus::Delivered;
        self.delivered_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Explicit user acknowledgement. Reachable from any pre-read
    /// state; the user action may race the delivery pipeline.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == NotificationStatus::Read {
            return false;
        }
        self.status = NotificationStatus::Read;
        self.read_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Books a failed dispatch attempt. Fatal failure classes
    /// (misconfigured, rejected) exhaust the budget immediately;
    /// transient ones restore PENDING while attempts remain.
    pub fn record_failure(&mut self, error: &str, fatal: bool, now: DateTime<Utc>) {
        self.attempts += 1;
        self.error_message = Some(error.to_string());
        if fatal || self.attempts >= self.max_attempts {
            self.status = NotificationStatus::Failed;
        } else {
            self.status = NotificationStatus::Pending;
        }
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != NotificationStatus::Pending {
            return false;
        }
        self.status = NotificationStatus::Cancelled;
        self.updated_at = now;
        true
    }
}

/// Insert payload for a notification; ids and lifecycle fields are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub template_code: Option<String>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub title: Option<String>,
    pub message: String,
    pub data: serde_json::Value,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub related_application_id: Option<i64>,
    pub related_document_id: Option<i64>,
}

impl NewNotification {
    pub fn new(
        recipient_id: i64,
        notification_type: NotificationType,
        channel: NotificationChannel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            template_code: None,
            notification_type,
            channel,
            title: None,
            message: message.into(),
            data: serde_json::json!({}),
            max_attempts: 3,
            scheduled_at: None,
            related_application_id: None,
            related_document_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub notification_id: i64,
    pub channel: NotificationChannel,
    pub recipient_contact: String,
    pub subject: Option<String>,
    pub body: String,
    pub html_body: Option<String>,
    pub provider_message_id: Option<String>,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub notification_id: i64,
    pub channel: NotificationChannel,
    pub recipient_contact: String,
    pub subject: Option<String>,
    pub body: String,
    pub html_body: Option<String>,
    pub provider_message_id: Option<String>,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub email_html: Option<String>,
    pub sms_body: Option<String>,
    pub push_title: Option<String>,
    pub push_body: Option<String>,
    pub channels: Vec<NotificationChannel>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotificationSettings {
    pub user_id: i64,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub whatsapp_enabled: bool,
    pub telegram_enabled: bool,
    pub application_notifications: bool,
    pub document_notifications: bool,
    pub deadline_notifications: bool,
    pub system_notifications: bool,
    pub news_notifications: bool,
    pub work_hours_only: bool,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserNotificationSettings {
    /// Default-enabled-all row, created lazily on first access.
    pub fn defaults(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            email_enabled: true,
            sms_enabled: true,
            push_enabled: true,
            whatsapp_enabled: false,
            telegram_enabled: false,
            application_notifications: true,
            document_notifications: true,
            deadline_notifications: true,
            system_notifications: true,
            news_notifications: false,
            work_hours_only: false,
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            quiet_hours_start: None,
            quiet_hours_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channel_enabled(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::Email => self.email_enabled,
            NotificationChannel::Sms => self.sms_enabled,
            NotificationChannel::Push => self.push_enabled,
            NotificationChannel::Whatsapp => self.whatsapp_enabled,
            NotificationChannel::Telegram => self.telegram_enabled,
        }
    }

    pub fn category_enabled(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::Application => self.application_notifications,
            NotificationCategory::Document => self.document_notifications,
            NotificationCategory::Deadline => self.deadline_notifications,
            NotificationCategory::System => self.system_notifications,
            NotificationCategory::News => self.news_notifications,
        }
    }

    /// Returns when delivery may resume if `now` falls inside the
    /// recipient's quiet-hours window or outside their work hours.
    /// None means delivery is allowed right now. Windows may wrap
    /// midnight; all times are interpreted in UTC.
    pub fn deferred_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let (Some(start), Some(end)) = (self.quiet_hours_start, self.quiet_hours_end) {
            if in_window(now.time(), start, end) {
                return Some(next_occurrence(now, end));
            }
        }
        if self.work_hours_only && !in_window(now.time(), self.work_start, self.work_end) {
            return Some(next_occurrence(now, self.work_start));
        }
        None
    }
}

fn in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        t >= start && t < end
    } else {
        // window wraps midnight, e.g. 22:00 - 07:00
        t >= start || t < end
    }
}

fn next_occurrence(now: DateTime<Utc>, target: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(target).and_utc();
    if today > now {
        today
    } else {
        (now.date_naive() + Days::new(1)).and_time(target).and_utc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    New,
    InProgress,
    PendingDocuments,
    UnderReview,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::New => "new",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::PendingDocuments => "pending_documents",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Completed => "completed",
            ApplicationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "new" => Ok(ApplicationStatus::New),
            "in_progress" => Ok(ApplicationStatus::InProgress),
            "pending_documents" => Ok(ApplicationStatus::PendingDocuments),
            "under_review" => Ok(ApplicationStatus::UnderReview),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "completed" => Ok(ApplicationStatus::Completed),
            "cancelled" => Ok(ApplicationStatus::Cancelled),
            other => Err(StoreError::invalid("application status", other)),
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(
            self,
            ApplicationStatus::Completed | ApplicationStatus::Rejected | ApplicationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub number: String,
    pub applicant_id: i64,
    pub assigned_to: Option<i64>,
    pub status: ApplicationStatus,
    pub subject: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub number: String,
    pub applicant_id: i64,
    pub assigned_to: Option<i64>,
    pub subject: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationHistory {
    pub id: i64,
    pub application_id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub old_status: Option<ApplicationStatus>,
    pub new_status: Option<ApplicationStatus>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub application_id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub old_status: Option<ApplicationStatus>,
    pub new_status: Option<ApplicationStatus>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub application_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
    pub device_token: Option<String>,
    pub whatsapp_phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Contact address used by the given channel, if the user has one.
    pub fn contact_for(&self, channel: NotificationChannel) -> Option<&str> {
        let contact = match channel {
            NotificationChannel::Email => Some(self.email.as_str()),
            NotificationChannel::Sms => self.phone.as_deref(),
            NotificationChannel::Push => self.device_token.as_deref(),
            NotificationChannel::Whatsapp => {
                self.whatsapp_phone.as_deref().or(self.phone.as_deref())
            }
            NotificationChannel::Telegram => None,
        };
        contact.filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pending(now: DateTime<Utc>) -> Notification {
        Notification {
            id: 1,
            recipient_id: 7,
            template_code: None,
            notification_type: NotificationType::System,
            channel: NotificationChannel::Email,
            title: None,
            message: "hello".into(),
            data: serde_json::json!({}),
            status: NotificationStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            scheduled_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error_message: None,
            related_application_id: None,
            related_document_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sent_sets_sent_at_once() {
        let now = Utc::now();
        let mut n = pending(now);
        n.mark_sent(now);
        assert_eq!(n.status, NotificationStatus::Sent);
        assert_eq!(n.sent_at, Some(now));

        let later = now + chrono::Duration::minutes(5);
        n.mark_sent(later);
        assert_eq!(n.sent_at, Some(now), "sent_at is set only once");
    }

    #[test]
    fn transient_failures_respect_the_budget() {
        let now = Utc::now();
        let mut n = pending(now);

        n.record_failure("timeout", false, now);
        assert_eq!(n.status, NotificationStatus::Pending);
        n.record_failure("timeout", false, now);
        assert_eq!(n.status, NotificationStatus::Pending);
        n.record_failure("timeout", false, now);
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts, n.max_attempts);
        assert_eq!(n.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn fatal_failure_is_immediately_terminal() {
        let now = Utc::now();
        let mut n = pending(now);
        n.record_failure("invalid phone number", true, now);
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts, 1);
    }

    #[test]
    fn read_is_reachable_from_pending() {
        let now = Utc::now();
        let mut n = pending(now);
        assert!(n.mark_read(now));
        assert_eq!(n.status, NotificationStatus::Read);
        assert!(n.read_at.is_some());
        assert!(!n.mark_read(now), "second read is a no-op");
    }

    #[test]
    fn delivered_only_from_sent() {
        let now = Utc::now();
        let mut n = pending(now);
        assert!(!n.mark_delivered(now));
        n.mark_sent(now);
        assert!(n.mark_delivered(now));
        assert!(n.sent_at.unwrap() <= n.delivered_at.unwrap());
    }

    #[test]
    fn cancel_only_before_dispatch() {
        let now = Utc::now();
        let mut n = pending(now);
        n.mark_sent(now);
        assert!(!n.cancel(now));

        let mut m = pending(now);
        assert!(m.cancel(now));
        assert_eq!(m.status, NotificationStatus::Cancelled);
    }

    #[test]
    fn due_respects_schedule() {
        let now = Utc::now();
        let mut n = pending(now);
        assert!(n.is_due(now));
        n.scheduled_at = Some(now + chrono::Duration::hours(1));
        assert!(!n.is_due(now));
        assert!(n.is_due(now + chrono::Duration::hours(2)));
    }

    #[test]
    fn quiet_hours_defer_across_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 23, 30, 0).unwrap();
        let mut s = UserNotificationSettings::defaults(1, now);
        s.quiet_hours_start = Some(NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        s.quiet_hours_end = Some(NaiveTime::from_hms_opt(7, 0, 0).unwrap());

        let resume = s.deferred_until(now).expect("inside quiet window");
        assert_eq!(resume, Utc.with_ymd_and_hms(2025, 3, 11, 7, 0, 0).unwrap());

        let afternoon = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap();
        assert!(s.deferred_until(afternoon).is_none());
    }

    #[test]
    fn work_hours_only_defers_to_next_morning() {
        let evening = Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap();
        let mut s = UserNotificationSettings::defaults(1, evening);
        s.work_hours_only = true;

        let resume = s.deferred_until(evening).expect("outside work hours");
        assert_eq!(resume, Utc.with_ymd_and_hms(2025, 3, 11, 9, 0, 0).unwrap());

        let noon = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        assert!(s.deferred_until(noon).is_none());
    }

    #[test]
    fn channel_and_category_gates() {
        let now = Utc::now();
        let mut s = UserNotificationSettings::defaults(1, now);
        assert!(s.channel_enabled(NotificationChannel::Email));
        assert!(!s.channel_enabled(NotificationChannel::Whatsapp));

        s.sms_enabled = false;
        assert!(!s.channel_enabled(NotificationChannel::Sms));

        assert!(s.category_enabled(NotificationCategory::Application));
        assert!(!s.category_enabled(NotificationCategory::News));
        assert_eq!(
            NotificationType::DeadlineApproaching.category(),
            NotificationCategory::Deadline
        );
    }

    #[test]
    fn enum_round_trips() {
        for channel in ["email", "sms", "push", "whatsapp", "telegram"] {
            assert_eq!(NotificationChannel::parse(channel).unwrap().as_str(), channel);
        }
        assert!(NotificationChannel::parse("carrier-pigeon").is_err());
        assert_eq!(
            NotificationStatus::parse("pending").unwrap(),
            NotificationStatus::Pending
        );
        assert!(ApplicationStatus::parse("in_progress").unwrap().is_open());
        assert!(!ApplicationStatus::parse("completed").unwrap().is_open());
    }

    #[test]
    fn contact_lookup_skips_empty_values() {
        let user = User {
            id: 1,
            email: "a@b.kz".into(),
            phone: Some("".into()),
            full_name: "Aigerim".into(),
            device_token: None,
            whatsapp_phone: None,
            created_at: Utc::now(),
        };
        assert_eq!(user.contact_for(NotificationChannel::Email), Some("a@b.kz"));
        assert_eq!(user.contact_for(NotificationChannel::Sms), None);
        assert_eq!(user.contact_for(NotificationChannel::Push), None);
    }
}
