use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use caseflow_core::AppContext;
use caseflow_notify::NotificationService;
use caseflow_workflow::ApplicationService;

use crate::handlers;

/// Everything the handlers need, injected as one Extension.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: AppContext,
    pub notify: Arc<NotificationService>,
    pub workflow: Arc<ApplicationService>,
}

pub fn router(state: ApiState) -> Router {
    // Allow specific origins when CORS_ORIGINS is set, otherwise stay
    // permissive for development.
    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let mut cors = CorsLayer::new();
        for origin in origins.split(',').map(|s| s.trim()) {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any).allow_headers(Any)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS");
        CorsLayer::permissive()
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/notifications", post(handlers::send_notification))
        .route("/api/v1/notifications", get(handlers::list_notifications))
        .route(
            "/api/v1/notifications/unread-count",
            get(handlers::unread_count),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .route(
            "/api/v1/notifications/:id/delivered",
            post(handlers::mark_notification_delivered),
        )
        .route(
            "/api/v1/notifications/:id/cancel",
            post(handlers::cancel_notification),
        )
        .route("/api/v1/applications", post(handlers::create_application))
        .route("/api/v1/applications/:id", get(handlers::get_application))
        .route(
            "/api/v1/applications/:id/status",
            post(handlers::change_application_status),
        )
        .route(
            "/api/v1/applications/:id/history",
            get(handlers::application_history),
        )
        .route(
            "/api/v1/applications/:id/documents",
            post(handlers::attach_document),
        )
        .route("/api/v1/documents/:id/sign", post(handlers::sign_document))
        .route("/api/v1/preferences", get(handlers::get_preferences))
        .route("/api/v1/preferences", post(handlers::update_preferences))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(state))
                .layer(cors_layer),
        )
}

pub async fn run(state: ApiState) -> Result<()> {
    let api_port = state.ctx.config.server.api_port;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
