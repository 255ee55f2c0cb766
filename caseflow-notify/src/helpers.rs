//! Convenience entry points for the business events that produce
//! notifications. Each builds the request (template code, data for
//! placeholder substitution, related ids) and hands it to the service;
//! opted-out recipients are discarded silently inside
//! `send_notification`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;

use caseflow_core::types::{
    Application, ApplicationStatus, Document, NotificationChannel, NotificationType,
};

use crate::service::{NotificationService, SendNotificationRequest};

pub async fn notify_application_created(
    service: &NotificationService,
    application: &Application,
) -> Result<()> {
    let mut request = SendNotificationRequest::new(
        application.applicant_id,
        NotificationType::ApplicationCreated,
        NotificationChannel::Email,
        format!(
            "Your application {} ({}) has been registered",
            application.number, application.subject
        ),
    );
    request.template_code = Some("application_created".into());
    request.title = Some("Application registered".into());
    request.data = json!({
        "number": application.number,
        "subject": application.subject,
    });
    request.related_application_id = Some(application.id);
    service.send_notification(request).await?;

    // the assigned case worker gets their own copy
    if let Some(assignee) = application.assigned_to {
        let mut request = SendNotificationRequest::new(
            assignee,
            NotificationType::ApplicationCreated,
            NotificationChannel::Email,
            format!(
                "Application {} ({}) has been assigned to you",
                application.number, application.subject
            ),
        );
        request.template_code = Some("application_assigned".into());
        request.title = Some("New application assigned".into());
        request.data = json!({
            "number": application.number,
            "subject": application.subject,
        });
        request.related_application_id = Some(application.id);
        service.send_notification(request).await?;
    }
    Ok(())
}

pub async fn notify_status_changed(
    service: &NotificationService,
    application: &Application,
    old_status: ApplicationStatus,
    new_status: ApplicationStatus,
) -> Result<()> {
    let mut request = SendNotificationRequest::new(
        application.applicant_id,
        NotificationType::ApplicationStatusChanged,
        NotificationChannel::Email,
        format!(
            "Application {} status changed from {} to {}",
            application.number,
            old_status.as_str(),
            new_status.as_str()
        ),
    );
    request.template_code = Some("status_changed".into());
    request.title = Some("Application status changed".into());
    request.data = json!({
        "number": application.number,
        "old_status": old_status.as_str(),
        "new_status": new_status.as_str(),
    });
    request.related_application_id = Some(application.id);
    service.send_notification(request).await?;
    Ok(())
}

/// Deadline reminders carry the deadline itself in `data`; the sweeper
/// uses it as the idempotency key so each deadline is announced once.
pub async fn notify_deadline_reminder(
    service: &NotificationService,
    application: &Application,
    deadline: DateTime<Utc>,
) -> Result<()> {
    let mut request = SendNotificationRequest::new(
        application.applicant_id,
        NotificationType::DeadlineApproaching,
        NotificationChannel::Email,
        format!(
            "Application {} has a deadline approaching on {}",
            application.number,
            deadline.format("%Y-%m-%d %H:%M")
        ),
    );
    request.template_code = Some("deadline_approaching".into());
    request.title = Some("Deadline approaching".into());
    request.data = json!({
        "number": application.number,
        "deadline": deadline.to_rfc3339(),
    });
    request.related_application_id = Some(application.id);
    service.send_notification(request).await?;
    Ok(())
}

pub async fn notify_document_generated(
    service: &NotificationService,
    document: &Document,
) -> Result<()> {
    let mut request = SendNotificationRequest::new(
        document.owner_id,
        NotificationType::DocumentGenerated,
        NotificationChannel::Email,
        format!("Document '{}' is ready", document.name),
    );
    request.template_code = Some("document_generated".into());
    request.title = Some("Document ready".into());
    request.data = json!({ "name": document.name });
    request.related_application_id = Some(document.application_id);
    request.related_document_id = Some(document.id);
    service.send_notification(request).await?;
    Ok(())
}

pub async fn notify_document_signed(
    service: &NotificationService,
    document: &Document,
) -> Result<()> {
    let mut request = SendNotificationRequest::new(
        document.owner_id,
        NotificationType::DocumentSigned,
        NotificationChannel::Email,
        format!("Document '{}' has been signed", document.name),
    );
    request.template_code = Some("document_signed".into());
    request.title = Some("Document signed".into());
    request.data = json!({ "name": document.name });
    request.related_application_id = Some(document.application_id);
    request.related_document_id = Some(document.id);
    service.send_notification(request).await?;
    Ok(())
}
