use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::{
    ApplicationRepo, DocumentRepo, HistoryRepo, NotificationRepo, OutboxRepo, Repos,
    SettingsRepo, TemplateRepo, UserRepo,
};
use crate::db::DbPool;
use crate::schema::{
    application_history, applications, documents, notification_templates, notifications,
    outbox_entries, user_notification_settings, users,
};
use crate::types::{
    Application, ApplicationHistory, ApplicationStatus, Document, NewApplication,
    NewHistoryEntry, NewNotification, NewOutboxEntry, Notification, NotificationChannel,
    NotificationStatus, NotificationTemplate, NotificationType, OutboxEntry, User,
    UserNotificationSettings,
};

pub struct PostgresRepos;

impl PostgresRepos {
    pub fn create(pool: Arc<DbPool>) -> Repos {
        Repos {
            users: Arc::new(PostgresUserRepo { pool: pool.clone() }),
            applications: Arc::new(PostgresApplicationRepo { pool: pool.clone() }),
            history: Arc::new(PostgresHistoryRepo { pool: pool.clone() }),
            documents: Arc::new(PostgresDocumentRepo { pool: pool.clone() }),
            notifications: Arc::new(PostgresNotificationRepo { pool: pool.clone() }),
            outbox: Arc::new(PostgresOutboxRepo { pool: pool.clone() }),
            templates: Arc::new(PostgresTemplateRepo { pool: pool.clone() }),
            settings: Arc::new(PostgresSettingsRepo { pool }),
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct UserRow {
    id: i64,
    email: String,
    phone: Option<String>,
    full_name: String,
    device_token: Option<String>,
    whatsapp_phone: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            phone: row.phone,
            full_name: row.full_name,
            device_token: row.device_token,
            whatsapp_phone: row.whatsapp_phone,
            created_at: row.created_at,
        }
    }
}

struct PostgresUserRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl UserRepo for PostgresUserRepo {
    async fn insert(&self, user: &User) -> Result<User> {
        let mut conn = self.pool.get().await?;
        let row: UserRow = diesel::insert_into(users::table)
            .values((
                users::email.eq(&user.email),
                users::phone.eq(&user.phone),
                users::full_name.eq(&user.full_name),
                users::device_token.eq(&user.device_token),
                users::whatsapp_phone.eq(&user.whatsapp_phone),
            ))
            .returning(UserRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn find(&self, user_id: i64) -> Result<Option<User>> {
        let mut conn = self.pool.get().await?;
        let row: Option<UserRow> = users::table
            .filter(users::id.eq(user_id))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::applications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ApplicationRow {
    id: i64,
    number: String,
    applicant_id: i64,
    assigned_to: Option<i64>,
    status: String,
    subject: String,
    description: String,
    deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = anyhow::Error;

    fn try_from(row: ApplicationRow) -> Result<Self> {
        Ok(Application {
            id: row.id,
            number: row.number,
            applicant_id: row.applicant_id,
            assigned_to: row.assigned_to,
            status: ApplicationStatus::parse(&row.status)?,
            subject: row.subject,
            description: row.description,
            deadline: row.deadline,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::application_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct HistoryRow {
    id: i64,
    application_id: i64,
    user_id: Option<i64>,
    action: String,
    old_status: Option<String>,
    new_status: Option<String>,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for ApplicationHistory {
    type Error = anyhow::Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(ApplicationHistory {
            id: row.id,
            application_id: row.application_id,
            user_id: row.user_id,
            action: row.action,
            old_status: row.old_status.as_deref().map(ApplicationStatus::parse).transpose()?,
            new_status: row.new_status.as_deref().map(ApplicationStatus::parse).transpose()?,
            comment: row.comment,
            created_at: row.created_at,
        })
    }
}

struct PostgresApplicationRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl ApplicationRepo for PostgresApplicationRepo {
    async fn insert(&self, new: NewApplication) -> Result<Application> {
        let mut conn = self.pool.get().await?;
        let row: ApplicationRow = diesel::insert_into(applications::table)
            .values((
                applications::number.eq(&new.number),
                applications::applicant_id.eq(new.applicant_id),
                applications::assigned_to.eq(new.assigned_to),
                applications::status.eq(ApplicationStatus::New.as_str()),
                applications::subject.eq(&new.subject),
                applications::description.eq(&new.description),
                applications::deadline.eq(new.deadline),
            ))
            .returning(ApplicationRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn find(&self, application_id: i64) -> Result<Option<Application>> {
        let mut conn = self.pool.get().await?;
        let row: Option<ApplicationRow> = applications::table
            .filter(applications::id.eq(application_id))
            .select(ApplicationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn transition_status(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        acting_user: Option<i64>,
        comment: Option<String>,
    ) -> Result<(Application, ApplicationHistory)> {
        let mut conn = self.pool.get().await?;
        let (app_row, history_row) = conn
            .transaction::<(ApplicationRow, HistoryRow), anyhow::Error, _>(|conn| {
                async move {
                    let now = Utc::now();
                    let old_status: String = applications::table
                        .filter(applications::id.eq(application_id))
                        .select(applications::status)
                        .first(conn)
                        .await
                        .optional()?
                        .ok_or_else(|| anyhow!("application {} not found", application_id))?;

                    let app_row: ApplicationRow =
                        diesel::update(applications::table.filter(applications::id.eq(application_id)))
                            .set((
                                applications::status.eq(new_status.as_str()),
                                applications::updated_at.eq(now),
                            ))
                            .returning(ApplicationRow::as_returning())
                            .get_result(conn)
                            .await?;

                    let history_row: HistoryRow =
                        diesel::insert_into(application_history::table)
                            .values((
                                application_history::application_id.eq(application_id),
                                application_history::user_id.eq(acting_user),
                                application_history::action.eq("status_changed"),
                                application_history::old_status.eq(Some(old_status)),
                                application_history::new_status.eq(Some(new_status.as_str())),
                                application_history::comment.eq(&comment),
                            ))
                            .returning(HistoryRow::as_returning())
                            .get_result(conn)
                            .await?;

                    Ok((app_row, history_row))
                }
                .scope_boxed()
            })
            .await
            .context("status transition failed")?;

        Ok((app_row.try_into()?, history_row.try_into()?))
    }

    async fn find_open_with_deadline_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Application>> {
        let mut conn = self.pool.get().await?;
        let open = [
            ApplicationStatus::New.as_str(),
            ApplicationStatus::InProgress.as_str(),
            ApplicationStatus::PendingDocuments.as_str(),
            ApplicationStatus::UnderReview.as_str(),
            ApplicationStatus::Approved.as_str(),
        ];
        let rows: Vec<ApplicationRow> = applications::table
            .filter(applications::status.eq_any(open))
            .filter(applications::deadline.is_not_null())
            .filter(applications::deadline.le(cutoff))
            .select(ApplicationRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

struct PostgresHistoryRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl HistoryRepo for PostgresHistoryRepo {
    async fn append(&self, entry: NewHistoryEntry) -> Result<ApplicationHistory> {
        let mut conn = self.pool.get().await?;
        let row: HistoryRow = diesel::insert_into(application_history::table)
            .values((
                application_history::application_id.eq(entry.application_id),
                application_history::user_id.eq(entry.user_id),
                application_history::action.eq(&entry.action),
                application_history::old_status.eq(entry.old_status.map(|s| s.as_str())),
                application_history::new_status.eq(entry.new_status.map(|s| s.as_str())),
                application_history::comment.eq(&entry.comment),
            ))
            .returning(HistoryRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn list_for_application(&self, application_id: i64) -> Result<Vec<ApplicationHistory>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<HistoryRow> = application_history::table
            .filter(application_history::application_id.eq(application_id))
            .order(application_history::created_at.asc())
            .select(HistoryRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::documents)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct DocumentRow {
    id: i64,
    application_id: i64,
    owner_id: i64,
    name: String,
    signed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            application_id: row.application_id,
            owner_id: row.owner_id,
            name: row.name,
            signed_at: row.signed_at,
            created_at: row.created_at,
        }
    }
}

struct PostgresDocumentRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl DocumentRepo for PostgresDocumentRepo {
    async fn insert(&self, document: &Document) -> Result<Document> {
        let mut conn = self.pool.get().await?;
        let row: DocumentRow = diesel::insert_into(documents::table)
            .values((
                documents::application_id.eq(document.application_id),
                documents::owner_id.eq(document.owner_id),
                documents::name.eq(&document.name),
                documents::signed_at.eq(document.signed_at),
            ))
            .returning(DocumentRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn find(&self, document_id: i64) -> Result<Option<Document>> {
        let mut conn = self.pool.get().await?;
        let row: Option<DocumentRow> = documents::table
            .filter(documents::id.eq(document_id))
            .select(DocumentRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn mark_signed(
        &self,
        document_id: i64,
        signed_at: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        let mut conn = self.pool.get().await?;
        let row: Option<DocumentRow> = diesel::update(documents::table)
            .filter(documents::id.eq(document_id))
            .set(documents::signed_at.eq(Some(signed_at)))
            .returning(DocumentRow::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct NotificationRow {
    id: i64,
    recipient_id: i64,
    template_code: Option<String>,
    notification_type: String,
    channel: String,
    title: Option<String>,
    message: String,
    data: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    related_application_id: Option<i64>,
    related_document_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            template_code: row.template_code,
            notification_type: NotificationType::parse(&row.notification_type)?,
            channel: NotificationChannel::parse(&row.channel)?,
            title: row.title,
            message: row.message,
            data: row.data,
            status: NotificationStatus::parse(&row.status)?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            error_message: row.error_message,
            related_application_id: row.related_application_id,
            related_document_id: row.related_document_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct PostgresNotificationRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl NotificationRepo for PostgresNotificationRepo {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let mut conn = self.pool.get().await?;
        let row: NotificationRow = diesel::insert_into(notifications::table)
            .values((
                notifications::recipient_id.eq(new.recipient_id),
                notifications::template_code.eq(&new.template_code),
                notifications::notification_type.eq(new.notification_type.as_str()),
                notifications::channel.eq(new.channel.as_str()),
                notifications::title.eq(&new.title),
                notifications::message.eq(&new.message),
                notifications::data.eq(&new.data),
                notifications::status.eq(NotificationStatus::Pending.as_str()),
                notifications::max_attempts.eq(new.max_attempts),
                notifications::scheduled_at.eq(new.scheduled_at),
                notifications::related_application_id.eq(new.related_application_id),
                notifications::related_document_id.eq(new.related_document_id),
            ))
            .returning(NotificationRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn find(&self, notification_id: i64) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        let row: Option<NotificationRow> = notifications::table
            .filter(notifications::id.eq(notification_id))
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn save(&self, notification: &Notification) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(notifications::table.filter(notifications::id.eq(notification.id)))
            .set((
                notifications::status.eq(notification.status.as_str()),
                notifications::attempts.eq(notification.attempts),
                notifications::scheduled_at.eq(notification.scheduled_at),
                notifications::sent_at.eq(notification.sent_at),
                notifications::delivered_at.eq(notification.delivered_at),
                notifications::read_at.eq(notification.read_at),
                notifications::error_message.eq(&notification.error_message),
                notifications::updated_at.eq(notification.updated_at),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim_for_dispatch(&self, notification_id: i64) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        // guarded UPDATE: only a PENDING row can be claimed, so two
        // concurrent dispatchers cannot both win
        let row: Option<NotificationRow> = diesel::update(
            notifications::table
                .filter(notifications::id.eq(notification_id))
                .filter(notifications::status.eq(NotificationStatus::Pending.as_str())),
        )
        .set((
            notifications::status.eq(NotificationStatus::Sending.as_str()),
            notifications::updated_at.eq(Utc::now()),
        ))
        .returning(NotificationRow::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::status.eq(NotificationStatus::Pending.as_str()))
            .filter(
                notifications::scheduled_at
                    .is_null()
                    .or(notifications::scheduled_at.le(now)),
            )
            .order(notifications::created_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_for_recipient(
        &self,
        recipient_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .order(notifications::created_at.desc())
            .limit(limit)
            .offset(offset)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_by_application_and_type(
        &self,
        application_id: i64,
        notification_type: NotificationType,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::related_application_id.eq(application_id))
            .filter(notifications::notification_type.eq(notification_type.as_str()))
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_read(&self, recipient_id: i64, notification_id: i64) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(notification_id))
                .filter(notifications::recipient_id.eq(recipient_id))
                .filter(notifications::status.ne(NotificationStatus::Read.as_str())),
        )
        .set((
            notifications::status.eq(NotificationStatus::Read.as_str()),
            notifications::read_at.eq(Some(now)),
            notifications::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    async fn unread_count(&self, recipient_id: i64) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let unread = [
            NotificationStatus::Pending.as_str(),
            NotificationStatus::Sent.as_str(),
            NotificationStatus::Delivered.as_str(),
        ];
        let count: i64 = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::status.eq_any(unread))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::outbox_entries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct OutboxRow {
    id: i64,
    notification_id: i64,
    channel: String,
    recipient_contact: String,
    subject: Option<String>,
    body: String,
    html_body: Option<String>,
    provider_message_id: Option<String>,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = anyhow::Error;

    fn try_from(row: OutboxRow) -> Result<Self> {
        Ok(OutboxEntry {
            id: row.id,
            notification_id: row.notification_id,
            channel: NotificationChannel::parse(&row.channel)?,
            recipient_contact: row.recipient_contact,
            subject: row.subject,
            body: row.body,
            html_body: row.html_body,
            provider_message_id: row.provider_message_id,
            status: NotificationStatus::parse(&row.status)?,
            error_message: row.error_message,
            created_at: row.created_at,
            sent_at: row.sent_at,
        })
    }
}

struct PostgresOutboxRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl OutboxRepo for PostgresOutboxRepo {
    async fn insert(&self, entry: NewOutboxEntry) -> Result<OutboxEntry> {
        let mut conn = self.pool.get().await?;
        let row: OutboxRow = diesel::insert_into(outbox_entries::table)
            .values((
                outbox_entries::notification_id.eq(entry.notification_id),
                outbox_entries::channel.eq(entry.channel.as_str()),
                outbox_entries::recipient_contact.eq(&entry.recipient_contact),
                outbox_entries::subject.eq(&entry.subject),
                outbox_entries::body.eq(&entry.body),
                outbox_entries::html_body.eq(&entry.html_body),
                outbox_entries::provider_message_id.eq(&entry.provider_message_id),
                outbox_entries::status.eq(entry.status.as_str()),
                outbox_entries::error_message.eq(&entry.error_message),
                outbox_entries::sent_at.eq(entry.sent_at),
            ))
            .returning(OutboxRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn find_for_notification(&self, notification_id: i64) -> Result<Vec<OutboxEntry>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<OutboxRow> = outbox_entries::table
            .filter(outbox_entries::notification_id.eq(notification_id))
            .order(outbox_entries::created_at.asc())
            .select(OutboxRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::notification_templates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct TemplateRow {
    id: i64,
    code: String,
    name: String,
    description: String,
    email_subject: Option<String>,
    email_body: Option<String>,
    email_html: Option<String>,
    sms_body: Option<String>,
    push_title: Option<String>,
    push_body: Option<String>,
    channels: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for NotificationTemplate {
    type Error = anyhow::Error;

    fn try_from(row: TemplateRow) -> Result<Self> {
        let channels: Vec<NotificationChannel> = serde_json::from_value(row.channels)
            .context("malformed template channel list")?;
        Ok(NotificationTemplate {
            id: row.id,
            code: row.code,
            name: row.name,
            description: row.description,
            email_subject: row.email_subject,
            email_body: row.email_body,
            email_html: row.email_html,
            sms_body: row.sms_body,
            push_title: row.push_title,
            push_body: row.push_body,
            channels,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct PostgresTemplateRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl TemplateRepo for PostgresTemplateRepo {
    async fn insert(&self, template: &NotificationTemplate) -> Result<NotificationTemplate> {
        let mut conn = self.pool.get().await?;
        let channels = serde_json::to_value(&template.channels)?;
        let row: TemplateRow = diesel::insert_into(notification_templates::table)
            .values((
                notification_templates::code.eq(&template.code),
                notification_templates::name.eq(&template.name),
                notification_templates::description.eq(&template.description),
                notification_templates::email_subject.eq(&template.email_subject),
                notification_templates::email_body.eq(&template.email_body),
                notification_templates::email_html.eq(&template.email_html),
                notification_templates::sms_body.eq(&template.sms_body),
                notification_templates::push_title.eq(&template.push_title),
                notification_templates::push_body.eq(&template.push_body),
                notification_templates::channels.eq(&channels),
                notification_templates::is_active.eq(template.is_active),
            ))
            .returning(TemplateRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<NotificationTemplate>> {
        let mut conn = self.pool.get().await?;
        let row: Option<TemplateRow> = notification_templates::table
            .filter(notification_templates::code.eq(code))
            .filter(notification_templates::is_active.eq(true))
            .select(TemplateRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::user_notification_settings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SettingsRow {
    user_id: i64,
    email_enabled: bool,
    sms_enabled: bool,
    push_enabled: bool,
    whatsapp_enabled: bool,
    telegram_enabled: bool,
    application_notifications: bool,
    document_notifications: bool,
    deadline_notifications: bool,
    system_notifications: bool,
    news_notifications: bool,
    work_hours_only: bool,
    work_start: NaiveTime,
    work_end: NaiveTime,
    quiet_hours_start: Option<NaiveTime>,
    quiet_hours_end: Option<NaiveTime>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SettingsRow> for UserNotificationSettings {
    fn from(row: SettingsRow) -> Self {
        UserNotificationSettings {
            user_id: row.user_id,
            email_enabled: row.email_enabled,
            sms_enabled: row.sms_enabled,
            push_enabled: row.push_enabled,
            whatsapp_enabled: row.whatsapp_enabled,
            telegram_enabled: row.telegram_enabled,
            application_notifications: row.application_notifications,
            document_notifications: row.document_notifications,
            deadline_notifications: row.deadline_notifications,
            system_notifications: row.system_notifications,
            news_notifications: row.news_notifications,
            work_hours_only: row.work_hours_only,
            work_start: row.work_start,
            work_end: row.work_end,
            quiet_hours_start: row.quiet_hours_start,
            quiet_hours_end: row.quiet_hours_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

struct PostgresSettingsRepo {
    pool: Arc<DbPool>,
}

#[async_trait::async_trait]
impl SettingsRepo for PostgresSettingsRepo {
    async fn get_or_create(&self, user_id: i64) -> Result<UserNotificationSettings> {
        let mut conn = self.pool.get().await?;
        // the unique constraint is the source of truth for "exists";
        // concurrent first accesses both land here and one insert wins
        diesel::insert_into(user_notification_settings::table)
            .values(user_notification_settings::user_id.eq(user_id))
            .on_conflict(user_notification_settings::user_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        let row: SettingsRow = user_notification_settings::table
            .filter(user_notification_settings::user_id.eq(user_id))
            .select(SettingsRow::as_select())
            .first(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn save(&self, settings: &UserNotificationSettings) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(
            user_notification_settings::table
                .filter(user_notification_settings::user_id.eq(settings.user_id)),
        )
        .set((
            user_notification_settings::email_enabled.eq(settings.email_enabled),
            user_notification_settings::sms_enabled.eq(settings.sms_enabled),
            user_notification_settings::push_enabled.eq(settings.push_enabled),
            user_notification_settings::whatsapp_enabled.eq(settings.whatsapp_enabled),
            user_notification_settings::telegram_enabled.eq(settings.telegram_enabled),
            user_notification_settings::application_notifications
                .eq(settings.application_notifications),
            user_notification_settings::document_notifications.eq(settings.document_notifications),
            user_notification_settings::deadline_notifications.eq(settings.deadline_notifications),
            user_notification_settings::system_notifications.eq(settings.system_notifications),
            user_notification_settings::news_notifications.eq(settings.news_notifications),
            user_notification_settings::work_hours_only.eq(settings.work_hours_only),
            user_notification_settings::work_start.eq(settings.work_start),
            user_notification_settings::work_end.eq(settings.work_end),
            user_notification_settings::quiet_hours_start.eq(settings.quiet_hours_start),
            user_notification_settings::quiet_hours_end.eq(settings.quiet_hours_end),
            user_notification_settings::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}
