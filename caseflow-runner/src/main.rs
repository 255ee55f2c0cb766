use std::sync::Arc;

use anyhow::Result;
use caseflow_api::{run as run_api, ApiState};
use caseflow_core::db::run_migrations;
use caseflow_core::{AppContext, Config};
use caseflow_delivery::SenderRegistry;
use caseflow_notify::NotificationService;
use caseflow_sweeper::run as run_sweeper;
use caseflow_workflow::ApplicationService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Caseflow server");

    let config = Config::from_env();
    run_migrations(&config.database).await?;

    let ctx = AppContext::new(config).await?;
    tracing::info!("Application context initialized");

    let senders = Arc::new(SenderRegistry::from_config(&ctx.config.delivery));
    let notify = Arc::new(NotificationService::new(ctx.clone(), senders));
    let workflow = Arc::new(ApplicationService::new(ctx.clone(), notify.clone()));

    let sweeper_ctx = ctx.clone();
    let sweeper_notify = notify.clone();
    tokio::spawn(async move {
        if let Err(e) = run_sweeper(sweeper_ctx, sweeper_notify).await {
            tracing::error!("Sweeper error: {}", e);
        }
    });

    // API server runs in the main task
    run_api(ApiState {
        ctx,
        notify,
        workflow,
    })
    .await?;

    Ok(())
}
