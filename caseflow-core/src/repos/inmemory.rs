//! In-memory repos used by tests and local development. Same
//! contracts as the Postgres implementations; everything lives behind
//! plain mutexes. Applications and their history share one lock so a
//! status transition and its audit row stay atomic.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use super::{
    ApplicationRepo, DocumentRepo, HistoryRepo, NotificationRepo, OutboxRepo, Repos,
    SettingsRepo, TemplateRepo, UserRepo,
};
use crate::types::{
    Application, ApplicationHistory, ApplicationStatus, Document, NewApplication,
    NewHistoryEntry, NewNotification, NewOutboxEntry, Notification, NotificationStatus,
    NotificationTemplate, NotificationType, OutboxEntry, User, UserNotificationSettings,
};

pub struct InMemoryRepos;

impl InMemoryRepos {
    pub fn create() -> Repos {
        let cases = Arc::new(Mutex::new(CaseStore::default()));
        Repos {
            users: Arc::new(InMemoryUserRepo::default()),
            applications: Arc::new(InMemoryApplicationRepo {
                store: cases.clone(),
            }),
            history: Arc::new(InMemoryHistoryRepo { store: cases }),
            documents: Arc::new(InMemoryDocumentRepo::default()),
            notifications: Arc::new(InMemoryNotificationRepo::default()),
            outbox: Arc::new(InMemoryOutboxRepo::default()),
            templates: Arc::new(InMemoryTemplateRepo::default()),
            settings: Arc::new(InMemorySettingsRepo::default()),
        }
    }
}

#[derive(Default)]
struct CaseStore {
    applications: Vec<Application>,
    history: Vec<ApplicationHistory>,
    next_application_id: i64,
    next_history_id: i64,
}

impl CaseStore {
    fn append_history(&mut self, entry: NewHistoryEntry, now: DateTime<Utc>) -> ApplicationHistory {
        self.next_history_id += 1;
        let row = ApplicationHistory {
            id: self.next_history_id,
            application_id: entry.application_id,
            user_id: entry.user_id,
            action: entry.action,
            old_status: entry.old_status,
            new_status: entry.new_status,
            comment: entry.comment,
            created_at: now,
        };
        self.history.push(row.clone());
        row
    }
}

#[derive(Default)]
struct InMemoryUserRepo {
    users: Mutex<Vec<User>>,
}

#[async_trait::async_trait]
impl UserRepo for InMemoryUserRepo {
    async fn insert(&self, user: &User) -> Result<User> {
        let mut users = self.users.lock().unwrap();
        let mut stored = user.clone();
        stored.id = users.len() as i64 + 1;
        users.push(stored.clone());
        Ok(stored)
    }

    async fn find(&self, user_id: i64) -> Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == user_id).cloned())
    }
}

struct InMemoryApplicationRepo {
    store: Arc<Mutex<CaseStore>>,
}

#[async_trait::async_trait]
impl ApplicationRepo for InMemoryApplicationRepo {
    async fn insert(&self, new: NewApplication) -> Result<Application> {
        let mut store = self.store.lock().unwrap();
        store.next_application_id += 1;
        let now = Utc::now();
        let app = Application {
            id: store.next_application_id,
            number: new.number,
            applicant_id: new.applicant_id,
            assigned_to: new.assigned_to,
            status: ApplicationStatus::New,
            subject: new.subject,
            description: new.description,
            deadline: new.deadline,
            created_at: now,
            updated_at: now,
        };
        store.applications.push(app.clone());
        Ok(app)
    }

    async fn find(&self, application_id: i64) -> Result<Option<Application>> {
        let store = self.store.lock().unwrap();
        Ok(store.applications.iter().find(|a| a.id == application_id).cloned())
    }

    async fn transition_status(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        acting_user: Option<i64>,
        comment: Option<String>,
    ) -> Result<(Application, ApplicationHistory)> {
        // single critical section: the update and the audit row land
        // together or not at all
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let old_status;
        let updated;
        {
            let app = match store.applications.iter_mut().find(|a| a.id == application_id) {
                Some(app) => app,
                None => bail!("application {} not found", application_id),
            };
            old_status = app.status;
            app.status = new_status;
            app.updated_at = now;
            updated = app.clone();
        }
        let entry = store.append_history(
            NewHistoryEntry {
                application_id,
                user_id: acting_user,
                action: "status_changed".into(),
                old_status: Some(old_status),
                new_status: Some(new_status),
                comment,
            },
            now,
        );
        Ok((updated, entry))
    }

    async fn find_open_with_deadline_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Application>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .applications
            .iter()
            .filter(|a| a.status.is_open())
            .filter(|a| a.deadline.map_or(false, |d| d <= cutoff))
            .cloned()
            .collect())
    }
}

struct InMemoryHistoryRepo {
    store: Arc<Mutex<CaseStore>>,
}

#[async_trait::async_trait]
impl HistoryRepo for InMemoryHistoryRepo {
    async fn append(&self, entry: NewHistoryEntry) -> Result<ApplicationHistory> {
        let mut store = self.store.lock().unwrap();
        Ok(store.append_history(entry, Utc::now()))
    }

    async fn list_for_application(&self, application_id: i64) -> Result<Vec<ApplicationHistory>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .history
            .iter()
            .filter(|h| h.application_id == application_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct InMemoryDocumentRepo {
    documents: Mutex<Vec<Document>>,
}

#[async_trait::async_trait]
impl DocumentRepo for InMemoryDocumentRepo {
    async fn insert(&self, document: &Document) -> Result<Document> {
        let mut documents = self.documents.lock().unwrap();
        let mut stored = document.clone();
        stored.id = documents.len() as i64 + 1;
        documents.push(stored.clone());
        Ok(stored)
    }

    async fn find(&self, document_id: i64) -> Result<Option<Document>> {
        let documents = self.documents.lock().unwrap();
        Ok(documents.iter().find(|d| d.id == document_id).cloned())
    }

    async fn mark_signed(
        &self,
        document_id: i64,
        signed_at: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        let mut documents = self.documents.lock().unwrap();
        match documents.iter_mut().find(|d| d.id == document_id) {
            Some(d) => {
                d.signed_at = Some(signed_at);
                Ok(Some(d.clone()))
            }
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct InMemoryNotificationRepo {
    notifications: Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl NotificationRepo for InMemoryNotificationRepo {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let mut notifications = self.notifications.lock().unwrap();
        let now = Utc::now();
        let n = Notification {
            id: notifications.len() as i64 + 1,
            recipient_id: new.recipient_id,
            template_code: new.template_code,
            notification_type: new.notification_type,
            channel: new.channel,
            title: new.title,
            message: new.message,
            data: new.data,
            status: NotificationStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts,
            scheduled_at: new.scheduled_at,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error_message: None,
            related_application_id: new.related_application_id,
            related_document_id: new.related_document_id,
            created_at: now,
            updated_at: now,
        };
        notifications.push(n.clone());
        Ok(n)
    }

    async fn find(&self, notification_id: i64) -> Result<Option<Notification>> {
        let notifications = self.notifications.lock().unwrap();
        Ok(notifications.iter().find(|n| n.id == notification_id).cloned())
    }

    async fn save(&self, notification: &Notification) -> Result<()> {
        let mut notifications = self.notifications.lock().unwrap();
        match notifications.iter_mut().find(|n| n.id == notification.id) {
            Some(stored) => {
                *stored = notification.clone();
                Ok(())
            }
            None => bail!("notification {} not found", notification.id),
        }
    }

    async fn claim_for_dispatch(&self, notification_id: i64) -> Result<Option<Notification>> {
        let mut notifications = self.notifications.lock().unwrap();
        match notifications.iter_mut().find(|n| n.id == notification_id) {
            Some(n) if n.status == NotificationStatus::Pending => {
                n.status = NotificationStatus::Sending;
                n.updated_at = Utc::now();
                Ok(Some(n.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let notifications = self.notifications.lock().unwrap();
        Ok(notifications
            .iter()
            .filter(|n| n.is_due(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_for_recipient(
        &self,
        recipient_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>> {
        let notifications = self.notifications.lock().unwrap();
        let mut rows: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn find_by_application_and_type(
        &self,
        application_id: i64,
        notification_type: NotificationType,
    ) -> Result<Vec<Notification>> {
        let notifications = self.notifications.lock().unwrap();
        Ok(notifications
            .iter()
            .filter(|n| n.related_application_id == Some(application_id))
            .filter(|n| n.notification_type == notification_type)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, recipient_id: i64, notification_id: i64) -> Result<bool> {
        let mut notifications = self.notifications.lock().unwrap();
        match notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.recipient_id == recipient_id)
        {
            Some(n) => Ok(n.mark_read(Utc::now())),
            None => Ok(false),
        }
    }

    async fn unread_count(&self, recipient_id: i64) -> Result<i64> {
        let notifications = self.notifications.lock().unwrap();
        Ok(notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && n.status.is_unread())
            .count() as i64)
    }
}

#[derive(Default)]
struct InMemoryOutboxRepo {
    entries: Mutex<Vec<OutboxEntry>>,
}

#[async_trait::async_trait]
impl OutboxRepo for InMemoryOutboxRepo {
    async fn insert(&self, entry: NewOutboxEntry) -> Result<OutboxEntry> {
        let mut entries = self.entries.lock().unwrap();
        let row = OutboxEntry {
            id: entries.len() as i64 + 1,
            notification_id: entry.notification_id,
            channel: entry.channel,
            recipient_contact: entry.recipient_contact,
            subject: entry.subject,
            body: entry.body,
            html_body: entry.html_body,
            provider_message_id: entry.provider_message_id,
            status: entry.status,
            error_message: entry.error_message,
            created_at: Utc::now(),
            sent_at: entry.sent_at,
        };
        entries.push(row.clone());
        Ok(row)
    }

    async fn find_for_notification(&self, notification_id: i64) -> Result<Vec<OutboxEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.notification_id == notification_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct InMemoryTemplateRepo {
    templates: Mutex<Vec<NotificationTemplate>>,
}

#[async_trait::async_trait]
impl TemplateRepo for InMemoryTemplateRepo {
    async fn insert(&self, template: &NotificationTemplate) -> Result<NotificationTemplate> {
        let mut templates = self.templates.lock().unwrap();
        if templates.iter().any(|t| t.code == template.code) {
            bail!("template code {} already exists", template.code);
        }
        let mut stored = template.clone();
        stored.id = templates.len() as i64 + 1;
        templates.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<NotificationTemplate>> {
        let templates = self.templates.lock().unwrap();
        Ok(templates
            .iter()
            .find(|t| t.code == code && t.is_active)
            .cloned())
    }
}

#[derive(Default)]
struct InMemorySettingsRepo {
    settings: Mutex<Vec<UserNotificationSettings>>,
}

#[async_trait::async_trait]
impl SettingsRepo for InMemorySettingsRepo {
    async fn get_or_create(&self, user_id: i64) -> Result<UserNotificationSettings> {
        let mut settings = self.settings.lock().unwrap();
        if let Some(existing) = settings.iter().find(|s| s.user_id == user_id) {
            return Ok(existing.clone());
        }
        let created = UserNotificationSettings::defaults(user_id, Utc::now());
        settings.push(created.clone());
        Ok(created)
    }

    async fn save(&self, updated: &UserNotificationSettings) -> Result<()> {
        let mut settings = self.settings.lock().unwrap();
        match settings.iter_mut().find(|s| s.user_id == updated.user_id) {
            Some(stored) => {
                *stored = updated.clone();
                Ok(())
            }
            None => {
                settings.push(updated.clone());
                Ok(())
            }
        }
    }
}
