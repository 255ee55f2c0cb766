mod inmemory;
mod postgres;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::DbPool;
use crate::types::{
    Application, ApplicationHistory, ApplicationStatus, Document, NewApplication,
    NewHistoryEntry, NewNotification, NewOutboxEntry, Notification, NotificationTemplate,
    NotificationType, OutboxEntry, User, UserNotificationSettings,
};

pub use inmemory::InMemoryRepos;
pub use postgres::PostgresRepos;

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    async fn insert(&self, user: &User) -> Result<User>;
    async fn find(&self, user_id: i64) -> Result<Option<User>>;
}

#[async_trait::async_trait]
pub trait ApplicationRepo: Send + Sync {
    async fn insert(&self, new: NewApplication) -> Result<Application>;
    async fn find(&self, application_id: i64) -> Result<Option<Application>>;
    /// Updates the application status and appends the audit row in one
    /// transaction; a status change can never commit unaudited.
    async fn transition_status(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        acting_user: Option<i64>,
        comment: Option<String>,
    ) -> Result<(Application, ApplicationHistory)>;
    /// Open applications whose deadline falls at or before `cutoff`.
    async fn find_open_with_deadline_before(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<Application>>;
}

#[async_trait::async_trait]
pub trait HistoryRepo: Send + Sync {
    async fn append(&self, entry: NewHistoryEntry) -> Result<ApplicationHistory>;
    async fn list_for_application(&self, application_id: i64) -> Result<Vec<ApplicationHistory>>;
}

#[async_trait::async_trait]
pub trait DocumentRepo: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<Document>;
    async fn find(&self, document_id: i64) -> Result<Option<Document>>;
    /// Stamps `signed_at`; None when the document does not exist.
    async fn mark_signed(
        &self,
        document_id: i64,
        signed_at: DateTime<Utc>,
    ) -> Result<Option<Document>>;
}

#[async_trait::async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn insert(&self, new: NewNotification) -> Result<Notification>;
    async fn find(&self, notification_id: i64) -> Result<Option<Notification>>;
    async fn save(&self, notification: &Notification) -> Result<()>;
    /// The per-notification dispatch guard: atomically flips
    /// PENDING -> SENDING and returns the claimed row. Returns None
    /// when the row is already in flight, terminal, or missing, in
    /// which case the caller must not attempt delivery.
    async fn claim_for_dispatch(&self, notification_id: i64) -> Result<Option<Notification>>;
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;
    async fn find_for_recipient(
        &self,
        recipient_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>>;
    async fn find_by_application_and_type(
        &self,
        application_id: i64,
        notification_type: NotificationType,
    ) -> Result<Vec<Notification>>;
    async fn mark_read(&self, recipient_id: i64, notification_id: i64) -> Result<bool>;
    async fn unread_count(&self, recipient_id: i64) -> Result<i64>;
}

#[async_trait::async_trait]
pub trait OutboxRepo: Send + Sync {
    async fn insert(&self, entry: NewOutboxEntry) -> Result<OutboxEntry>;
    async fn find_for_notification(&self, notification_id: i64) -> Result<Vec<OutboxEntry>>;
}

#[async_trait::async_trait]
pub trait TemplateRepo: Send + Sync {
    async fn insert(&self, template: &NotificationTemplate) -> Result<NotificationTemplate>;
    /// Active template addressed by code; inactive templates are
    /// invisible to dispatch.
    async fn find_by_code(&self, code: &str) -> Result<Option<NotificationTemplate>>;
}

#[async_trait::async_trait]
pub trait SettingsRepo: Send + Sync {
    /// Lazy per-user row creation. Backed by an upsert keyed on the
    /// user id so concurrent first accesses cannot produce duplicates.
    async fn get_or_create(&self, user_id: i64) -> Result<UserNotificationSettings>;
    async fn save(&self, settings: &UserNotificationSettings) -> Result<()>;
}

#[derive(Clone)]
pub struct Repos {
    pub users: Arc<dyn UserRepo>,
    pub applications: Arc<dyn ApplicationRepo>,
    pub history: Arc<dyn HistoryRepo>,
    pub documents: Arc<dyn DocumentRepo>,
    pub notifications: Arc<dyn NotificationRepo>,
    pub outbox: Arc<dyn OutboxRepo>,
    pub templates: Arc<dyn TemplateRepo>,
    pub settings: Arc<dyn SettingsRepo>,
}

impl Repos {
    pub fn create_postgres(pool: Arc<DbPool>) -> Self {
        PostgresRepos::create(pool)
    }

    pub fn create_inmemory() -> Self {
        InMemoryRepos::create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewNotification, NotificationChannel, NotificationStatus};

    fn user() -> User {
        User {
            id: 0,
            email: "applicant@example.kz".into(),
            phone: Some("+77010000001".into()),
            full_name: "Aigerim Beketova".into(),
            device_token: None,
            whatsapp_phone: None,
            created_at: Utc::now(),
        }
    }

    fn notification_for(recipient_id: i64) -> NewNotification {
        NewNotification::new(
            recipient_id,
            NotificationType::System,
            NotificationChannel::Email,
            "ping",
        )
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();
        let n = repos
            .notifications
            .insert(notification_for(u.id))
            .await
            .unwrap();

        let first = repos.notifications.claim_for_dispatch(n.id).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, NotificationStatus::Sending);

        // second claim loses the race
        let second = repos.notifications.claim_for_dispatch(n.id).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn due_scan_skips_future_and_non_pending() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();
        let now = Utc::now();

        let due = repos.notifications.insert(notification_for(u.id)).await.unwrap();
        let mut future = notification_for(u.id);
        future.scheduled_at = Some(now + chrono::Duration::hours(2));
        let future = repos.notifications.insert(future).await.unwrap();
        let mut sent = repos.notifications.insert(notification_for(u.id)).await.unwrap();
        sent.mark_sent(now);
        repos.notifications.save(&sent).await.unwrap();

        let found = repos.notifications.find_due(now, 50).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|n| n.id).collect();
        assert!(ids.contains(&due.id));
        assert!(!ids.contains(&future.id));
        assert!(!ids.contains(&sent.id));
    }

    #[tokio::test]
    async fn mark_read_is_scoped_to_the_recipient() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();
        let n = repos.notifications.insert(notification_for(u.id)).await.unwrap();

        assert!(!repos.notifications.mark_read(u.id + 1, n.id).await.unwrap());
        assert!(repos.notifications.mark_read(u.id, n.id).await.unwrap());
        // already read
        assert!(!repos.notifications.mark_read(u.id, n.id).await.unwrap());

        let stored = repos.notifications.find(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Read);
        assert!(stored.read_at.is_some());
    }

    #[tokio::test]
    async fn unread_count_tracks_lifecycle() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();

        let a = repos.notifications.insert(notification_for(u.id)).await.unwrap();
        let mut b = repos.notifications.insert(notification_for(u.id)).await.unwrap();
        b.mark_sent(Utc::now());
        repos.notifications.save(&b).await.unwrap();
        let mut c = repos.notifications.insert(notification_for(u.id)).await.unwrap();
        c.record_failure("boom", true, Utc::now());
        repos.notifications.save(&c).await.unwrap();

        assert_eq!(repos.notifications.unread_count(u.id).await.unwrap(), 2);
        repos.notifications.mark_read(u.id, a.id).await.unwrap();
        assert_eq!(repos.notifications.unread_count(u.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn settings_upsert_is_idempotent() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();

        let mut first = repos.settings.get_or_create(u.id).await.unwrap();
        assert!(first.email_enabled);
        first.sms_enabled = false;
        repos.settings.save(&first).await.unwrap();

        let second = repos.settings.get_or_create(u.id).await.unwrap();
        assert!(!second.sms_enabled, "existing row is returned, not replaced");
    }

    #[tokio::test]
    async fn status_transition_appends_exactly_one_audit_row() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();
        let app = repos
            .applications
            .insert(NewApplication {
                number: "APP-TEST-1".into(),
                applicant_id: u.id,
                assigned_to: None,
                subject: "Debt restructuring".into(),
                description: String::new(),
                deadline: None,
            })
            .await
            .unwrap();
        assert_eq!(app.status, ApplicationStatus::New);

        let (updated, entry) = repos
            .applications
            .transition_status(app.id, ApplicationStatus::InProgress, Some(u.id), None)
            .await
            .unwrap();
        assert_eq!(updated.status, ApplicationStatus::InProgress);
        assert_eq!(entry.old_status, Some(ApplicationStatus::New));
        assert_eq!(entry.new_status, Some(ApplicationStatus::InProgress));

        let history = repos.history.list_for_application(app.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn transition_of_missing_application_fails_without_audit() {
        let repos = Repos::create_inmemory();
        let err = repos
            .applications
            .transition_status(999, ApplicationStatus::Approved, None, None)
            .await;
        assert!(err.is_err());
        let history = repos.history.list_for_application(999).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn deadline_scan_finds_open_applications_only() {
        let repos = Repos::create_inmemory();
        let u = repos.users.insert(&user()).await.unwrap();
        let now = Utc::now();

        let soon = repos
            .applications
            .insert(NewApplication {
                number: "APP-D-1".into(),
                applicant_id: u.id,
                assigned_to: None,
                subject: "due soon".into(),
                description: String::new(),
                deadline: Some(now + chrono::Duration::hours(3)),
            })
            .await
            .unwrap();
        repos
            .applications
            .insert(NewApplication {
                number: "APP-D-2".into(),
                applicant_id: u.id,
                assigned_to: None,
                subject: "far away".into(),
                description: String::new(),
                deadline: Some(now + chrono::Duration::days(30)),
            })
            .await
            .unwrap();
        let closed = repos
            .applications
            .insert(NewApplication {
                number: "APP-D-3".into(),
                applicant_id: u.id,
                assigned_to: None,
                subject: "already done".into(),
                description: String::new(),
                deadline: Some(now + chrono::Duration::hours(3)),
            })
            .await
            .unwrap();
        repos
            .applications
            .transition_status(closed.id, ApplicationStatus::Completed, None, None)
            .await
            .unwrap();

        let cutoff = now + chrono::Duration::hours(24);
        let found = repos
            .applications
            .find_open_with_deadline_before(cutoff)
            .await
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![soon.id]);
    }
}
