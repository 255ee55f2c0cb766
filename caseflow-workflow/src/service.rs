use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use caseflow_core::types::{
    Application, ApplicationHistory, ApplicationStatus, Document, NewApplication,
    NewHistoryEntry,
};
use caseflow_core::AppContext;
use caseflow_notify::{helpers, NotificationService};

#[derive(Debug, Clone)]
pub struct CreateApplicationRequest {
    pub applicant_id: i64,
    pub assigned_to: Option<i64>,
    pub subject: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
}

/// Application workflow: creation, audited status transitions and the
/// document milestones. Notifications are fired after the storage
/// work commits; a notify failure is logged and never rolls back or
/// fails the business operation.
pub struct ApplicationService {
    ctx: AppContext,
    notify: Arc<NotificationService>,
}

impl ApplicationService {
    pub fn new(ctx: AppContext, notify: Arc<NotificationService>) -> Self {
        Self { ctx, notify }
    }

    pub async fn create_application(
        &self,
        request: CreateApplicationRequest,
    ) -> Result<Application> {
        let number = generate_number(Utc::now());
        let application = self
            .ctx
            .repos
            .applications
            .insert(NewApplication {
                number,
                applicant_id: request.applicant_id,
                assigned_to: request.assigned_to,
                subject: request.subject,
                description: request.description,
                deadline: request.deadline,
            })
            .await?;

        self.ctx
            .repos
            .history
            .append(NewHistoryEntry {
                application_id: application.id,
                user_id: Some(request.applicant_id),
                action: "created".into(),
                old_status: None,
                new_status: Some(application.status),
                comment: None,
            })
            .await?;

        tracing::info!(
            "Application {} created for applicant {}",
            application.number,
            application.applicant_id
        );

        if let Err(e) = helpers::notify_application_created(&self.notify, &application).await {
            tracing::error!(
                "Failed to notify about application {}: {}",
                application.number,
                e
            );
        }
        Ok(application)
    }

    pub async fn change_status(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        acting_user: Option<i64>,
        comment: Option<String>,
    ) -> Result<Application> {
        let (application, entry) = self
            .ctx
            .repos
            .applications
            .transition_status(application_id, new_status, acting_user, comment)
            .await?;

        tracing::info!(
            "Application {} moved {:?} -> {:?}",
            application.number,
            entry.old_status,
            entry.new_status
        );

        if let Some(old_status) = entry.old_status {
            if let Err(e) =
                helpers::notify_status_changed(&self.notify, &application, old_status, new_status)
                    .await
            {
                tracing::error!(
                    "Failed to notify about status change of {}: {}",
                    application.number,
                    e
                );
            }
        }
        Ok(application)
    }

    pub async fn get_application(&self, application_id: i64) -> Result<Option<Application>> {
        self.ctx.repos.applications.find(application_id).await
    }

    pub async fn history(&self, application_id: i64) -> Result<Vec<ApplicationHistory>> {
        self.ctx
            .repos
            .history
            .list_for_application(application_id)
            .await
    }

    pub async fn attach_document(
        &self,
        application_id: i64,
        owner_id: i64,
        name: impl Into<String>,
    ) -> Result<Document> {
        if self
            .ctx
            .repos
            .applications
            .find(application_id)
            .await?
            .is_none()
        {
            return Err(anyhow!("application {} not found", application_id));
        }

        let document = self
            .ctx
            .repos
            .documents
            .insert(&Document {
                id: 0,
                application_id,
                owner_id,
                name: name.into(),
                signed_at: None,
                created_at: Utc::now(),
            })
            .await?;

        if let Err(e) = helpers::notify_document_generated(&self.notify, &document).await {
            tracing::error!("Failed to notify about document {}: {}", document.id, e);
        }
        Ok(document)
    }

    pub async fn sign_document(&self, document_id: i64) -> Result<Document> {
        let document = self
            .ctx
            .repos
            .documents
            .mark_signed(document_id, Utc::now())
            .await?
            .ok_or_else(|| anyhow!("document {} not found", document_id))?;

        if let Err(e) = helpers::notify_document_signed(&self.notify, &document).await {
            tracing::error!(
                "Failed to notify about signing of document {}: {}",
                document.id,
                e
            );
        }
        Ok(document)
    }
}

/// Human-facing application number. A random suffix instead of a
/// per-day counter, so concurrent creations cannot collide.
fn generate_number(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "APP-{}-{}",
        now.format("%Y%m%d"),
        suffix[..6].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use caseflow_core::types::{NotificationChannel, NotificationType, User};
    use caseflow_core::Config;
    use caseflow_delivery::{
        ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId, SenderRegistry,
    };

    struct CountingSender {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait::async_trait]
    impl ChannelSender for CountingSender {
        async fn send(
            &self,
            message: &OutboundMessage,
        ) -> std::result::Result<ProviderMessageId, DeliveryFailure> {
            self.sent.lock().unwrap().push(message.clone());
            Ok("prov-1".into())
        }
    }

    async fn setup() -> (ApplicationService, Arc<NotificationService>, User, User) {
        let ctx = AppContext::inmemory(Config::from_env());
        let applicant = ctx
            .repos
            .users
            .insert(&User {
                id: 0,
                email: "applicant@example.kz".into(),
                phone: None,
                full_name: "Aigerim Beketova".into(),
                device_token: None,
                whatsapp_phone: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let worker = ctx
            .repos
            .users
            .insert(&User {
                id: 0,
                email: "worker@example.kz".into(),
                phone: None,
                full_name: "Daniyar Omarov".into(),
                device_token: None,
                whatsapp_phone: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut registry = SenderRegistry::new(Duration::from_secs(5));
        registry.register(
            NotificationChannel::Email,
            Arc::new(CountingSender {
                sent: Mutex::new(Vec::new()),
            }),
        );
        let notify = Arc::new(NotificationService::new(ctx.clone(), Arc::new(registry)));
        let service = ApplicationService::new(ctx, notify.clone());
        (service, notify, applicant, worker)
    }

    fn request(applicant: &User, assigned_to: Option<i64>) -> CreateApplicationRequest {
        CreateApplicationRequest {
            applicant_id: applicant.id,
            assigned_to,
            subject: "Debt restructuring".into(),
            description: "Request to restructure consumer debt".into(),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn creation_writes_one_history_row_and_notifies() {
        let (service, notify, applicant, _) = setup().await;

        let app = service
            .create_application(request(&applicant, None))
            .await
            .unwrap();
        assert!(app.number.starts_with("APP-"));
        assert_eq!(app.status, ApplicationStatus::New);

        let history = service.history(app.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "created");
        assert_eq!(history[0].new_status, Some(ApplicationStatus::New));

        let notifications = notify
            .list_for_recipient(applicant.id, 10, 0)
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].notification_type,
            NotificationType::ApplicationCreated
        );
        assert_eq!(notifications[0].related_application_id, Some(app.id));
    }

    #[tokio::test]
    async fn assignee_gets_their_own_notification() {
        let (service, notify, applicant, worker) = setup().await;

        service
            .create_application(request(&applicant, Some(worker.id)))
            .await
            .unwrap();

        assert_eq!(notify.list_for_recipient(applicant.id, 10, 0).await.unwrap().len(), 1);
        assert_eq!(notify.list_for_recipient(worker.id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_change_is_audited_and_announced() {
        let (service, notify, applicant, worker) = setup().await;
        let app = service
            .create_application(request(&applicant, None))
            .await
            .unwrap();

        let updated = service
            .change_status(
                app.id,
                ApplicationStatus::InProgress,
                Some(worker.id),
                Some("picked up".into()),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ApplicationStatus::InProgress);

        let history = service.history(app.id).await.unwrap();
        assert_eq!(history.len(), 2, "created + transition");
        let last = history.last().unwrap();
        assert_eq!(last.old_status, Some(ApplicationStatus::New));
        assert_eq!(last.new_status, Some(ApplicationStatus::InProgress));
        assert_eq!(last.comment.as_deref(), Some("picked up"));

        let notifications = notify
            .list_for_recipient(applicant.id, 10, 0)
            .await
            .unwrap();
        let change = notifications
            .iter()
            .find(|n| n.notification_type == NotificationType::ApplicationStatusChanged)
            .expect("status change notification");
        assert_eq!(change.data["old_status"], "new");
        assert_eq!(change.data["new_status"], "in_progress");
    }

    #[tokio::test]
    async fn status_change_of_missing_application_fails() {
        let (service, _, _, _) = setup().await;
        assert!(service
            .change_status(4242, ApplicationStatus::Approved, None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn document_lifecycle_notifies_the_owner() {
        let (service, notify, applicant, _) = setup().await;
        let app = service
            .create_application(request(&applicant, None))
            .await
            .unwrap();

        let doc = service
            .attach_document(app.id, applicant.id, "Restructuring agreement")
            .await
            .unwrap();
        assert!(doc.signed_at.is_none());

        let signed = service.sign_document(doc.id).await.unwrap();
        assert!(signed.signed_at.is_some());

        let notifications = notify
            .list_for_recipient(applicant.id, 10, 0)
            .await
            .unwrap();
        assert!(notifications
            .iter()
            .any(|n| n.notification_type == NotificationType::DocumentGenerated));
        assert!(notifications
            .iter()
            .any(|n| n.notification_type == NotificationType::DocumentSigned));
    }

    #[tokio::test]
    async fn numbers_carry_the_date_and_a_random_suffix() {
        let now = Utc::now();
        let a = generate_number(now);
        let b = generate_number(now);
        assert!(a.starts_with(&format!("APP-{}-", now.format("%Y%m%d"))));
        assert_ne!(a, b);
    }
}
