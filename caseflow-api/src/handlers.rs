use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use caseflow_core::types::{
    ApplicationStatus, NotificationChannel, NotificationType, UserNotificationSettings,
};
use caseflow_notify::SendNotificationRequest;
use caseflow_workflow::CreateApplicationRequest;

use crate::server::ApiState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "caseflow-api"
    }))
}

#[derive(Deserialize)]
pub struct SendNotificationBody {
    pub recipient_id: i64,
    pub notification_type: String,
    pub channel: String,
    #[serde(default)]
    pub template_code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_application_id: Option<i64>,
    #[serde(default)]
    pub related_document_id: Option<i64>,
}

pub async fn send_notification(
    Extension(state): Extension<ApiState>,
    Json(body): Json<SendNotificationBody>,
) -> Result<Json<Value>, StatusCode> {
    let notification_type = NotificationType::parse(&body.notification_type)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let channel =
        NotificationChannel::parse(&body.channel).map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let mut request =
        SendNotificationRequest::new(body.recipient_id, notification_type, channel, body.message);
    request.template_code = body.template_code;
    request.title = body.title;
    if let Some(data) = body.data {
        request.data = data;
    }
    request.scheduled_at = body.scheduled_at;
    request.related_application_id = body.related_application_id;
    request.related_document_id = body.related_document_id;

    match state.notify.send_notification(request).await {
        Ok(Some(notification)) => Ok(Json(json!({
            "status": "created",
            "notification": notification
        }))),
        Ok(None) => Ok(Json(json!({ "status": "discarded" }))),
        Err(e) => {
            tracing::error!("Failed to send notification: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub user_id: i64,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_notifications(
    Extension(state): Extension<ApiState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(50).min(100);
    let offset = params.offset.unwrap_or(0);

    let notifications = state
        .notify
        .list_for_recipient(params.user_id, limit, offset)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "notifications": notifications })))
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

pub async fn unread_count(
    Extension(state): Extension<ApiState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Value>, StatusCode> {
    let count = state
        .notify
        .unread_count(params.user_id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "unread": count })))
}

pub async fn mark_notification_read(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Value>, StatusCode> {
    let updated = state
        .notify
        .mark_as_read(params.user_id, id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "updated": updated })))
}

/// Provider delivery-confirmation webhook.
pub async fn mark_notification_delivered(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    match state.notify.mark_delivered(id).await {
        Ok(updated) => Ok(Json(json!({ "updated": updated }))),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn cancel_notification(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    match state.notify.cancel(id).await {
        Ok(cancelled) => Ok(Json(json!({ "cancelled": cancelled }))),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Deserialize)]
pub struct CreateApplicationBody {
    pub applicant_id: i64,
    #[serde(default)]
    pub assigned_to: Option<i64>,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

pub async fn create_application(
    Extension(state): Extension<ApiState>,
    Json(body): Json<CreateApplicationBody>,
) -> Result<Json<Value>, StatusCode> {
    let application = state
        .workflow
        .create_application(CreateApplicationRequest {
            applicant_id: body.applicant_id,
            assigned_to: body.assigned_to,
            subject: body.subject,
            description: body.description,
            deadline: body.deadline,
        })
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "application": application })))
}

pub async fn get_application(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    let application = state
        .workflow
        .get_application(id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "application": application })))
}

#[derive(Deserialize)]
pub struct ChangeStatusBody {
    pub status: String,
    #[serde(default)]
    pub acting_user: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn change_application_status(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<ChangeStatusBody>,
) -> Result<Json<Value>, StatusCode> {
    let new_status =
        ApplicationStatus::parse(&body.status).map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    if state
        .workflow
        .get_application(id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let application = state
        .workflow
        .change_status(id, new_status, body.acting_user, body.comment)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "application": application })))
}

pub async fn application_history(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    if state
        .workflow
        .get_application(id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }
    let history = state.workflow.history(id).await.map_err(internal)?;
    Ok(Json(json!({ "history": history })))
}

#[derive(Deserialize)]
pub struct AttachDocumentBody {
    pub owner_id: i64,
    pub name: String,
}

pub async fn attach_document(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<AttachDocumentBody>,
) -> Result<Json<Value>, StatusCode> {
    if state
        .workflow
        .get_application(id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }
    let document = state
        .workflow
        .attach_document(id, body.owner_id, body.name)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "document": document })))
}

pub async fn sign_document(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    if state
        .ctx
        .repos
        .documents
        .find(id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }
    let document = state.workflow.sign_document(id).await.map_err(internal)?;
    Ok(Json(json!({ "document": document })))
}

pub async fn get_preferences(
    Extension(state): Extension<ApiState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Value>, StatusCode> {
    let settings = state
        .notify
        .get_settings(params.user_id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "preferences": settings })))
}

/// Partial preferences update: absent fields keep their stored value.
/// `clear_quiet_hours` drops the quiet window entirely.
#[derive(Default, Deserialize)]
pub struct UpdatePreferencesBody {
    pub user_id: i64,
    #[serde(default)]
    pub email_enabled: Option<bool>,
    #[serde(default)]
    pub sms_enabled: Option<bool>,
    #[serde(default)]
    pub push_enabled: Option<bool>,
    #[serde(default)]
    pub whatsapp_enabled: Option<bool>,
    #[serde(default)]
    pub telegram_enabled: Option<bool>,
    #[serde(default)]
    pub application_notifications: Option<bool>,
    #[serde(default)]
    pub document_notifications: Option<bool>,
    #[serde(default)]
    pub deadline_notifications: Option<bool>,
    #[serde(default)]
    pub system_notifications: Option<bool>,
    #[serde(default)]
    pub news_notifications: Option<bool>,
    #[serde(default)]
    pub work_hours_only: Option<bool>,
    #[serde(default)]
    pub work_start: Option<NaiveTime>,
    #[serde(default)]
    pub work_end: Option<NaiveTime>,
    #[serde(default)]
    pub quiet_hours_start: Option<NaiveTime>,
    #[serde(default)]
    pub quiet_hours_end: Option<NaiveTime>,
    #[serde(default)]
    pub clear_quiet_hours: Option<bool>,
}

pub async fn update_preferences(
    Extension(state): Extension<ApiState>,
    Json(body): Json<UpdatePreferencesBody>,
) -> Result<Json<Value>, StatusCode> {
    let mut settings = state
        .notify
        .get_settings(body.user_id)
        .await
        .map_err(internal)?;
    apply_preferences(&mut settings, &body);
    settings.updated_at = Utc::now();
    state
        .notify
        .update_settings(&settings)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "preferences": settings })))
}

fn apply_preferences(settings: &mut UserNotificationSettings, body: &UpdatePreferencesBody) {
    macro_rules! merge {
        ($field:ident) => {
            if let Some(v) = body.$field {
                settings.$field = v;
            }
        };
    }
    merge!(email_enabled);
    merge!(sms_enabled);
    merge!(push_enabled);
    merge!(whatsapp_enabled);
    merge!(telegram_enabled);
    merge!(application_notifications);
    merge!(document_notifications);
    merge!(deadline_notifications);
    merge!(system_notifications);
    merge!(news_notifications);
    merge!(work_hours_only);
    merge!(work_start);
    merge!(work_end);

    if body.clear_quiet_hours == Some(true) {
        settings.quiet_hours_start = None;
        settings.quiet_hours_end = None;
    } else {
        if body.quiet_hours_start.is_some() {
            settings.quiet_hours_start = body.quiet_hours_start;
        }
        if body.quiet_hours_end.is_some() {
            settings.quiet_hours_end = body.quiet_hours_end;
        }
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    tracing::error!("Request failed: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
