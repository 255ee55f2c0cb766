//! Periodic sweeper. Each tick redispatches due notifications
//! (scheduled sends, quiet-hours deferrals and transport retries all
//! surface as PENDING rows with a passed schedule) and synthesizes
//! deadline reminders for open applications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;

use caseflow_core::types::NotificationType;
use caseflow_core::AppContext;
use caseflow_notify::{helpers, NotificationService};

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub dispatched: usize,
    pub reminders: usize,
}

pub async fn run(ctx: AppContext, notify: Arc<NotificationService>) -> Result<()> {
    let interval = Duration::from_secs(ctx.config.sweeper.interval_secs);
    tracing::info!("Starting notification sweeper (interval {:?})", interval);

    loop {
        match sweep_once(&ctx, &notify).await {
            Ok(stats) => {
                if stats.dispatched > 0 || stats.reminders > 0 {
                    tracing::info!(
                        "Sweep dispatched {} notifications, created {} deadline reminders",
                        stats.dispatched,
                        stats.reminders
                    );
                }
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                tracing::error!("Error in sweeper: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// One full sweep: due redispatch then deadline reminders. Callable
/// on its own so the behavior is testable without the loop.
pub async fn sweep_once(ctx: &AppContext, notify: &Arc<NotificationService>) -> Result<SweepStats> {
    let now = Utc::now();
    let mut stats = SweepStats::default();

    let due = ctx
        .repos
        .notifications
        .find_due(now, ctx.config.sweeper.batch_size)
        .await?;
    stats.dispatched = due.len();

    futures::stream::iter(due)
        .for_each_concurrent(ctx.config.sweeper.concurrency, |notification| {
            let notify = notify.clone();
            async move {
                if let Err(e) = notify.dispatch(notification.id).await {
                    tracing::error!("Dispatch of notification {} failed: {}", notification.id, e);
                }
            }
        })
        .await;

    stats.reminders = sweep_deadlines(ctx, notify, now).await?;
    Ok(stats)
}

/// Open applications whose deadline falls inside the lookahead window
/// get one DEADLINE_APPROACHING notification per deadline. The
/// deadline carried in the notification's `data` is the idempotency
/// key; rescheduling an application re-arms the reminder.
async fn sweep_deadlines(
    ctx: &AppContext,
    notify: &Arc<NotificationService>,
    now: chrono::DateTime<Utc>,
) -> Result<usize> {
    let cutoff = now + ChronoDuration::hours(ctx.config.sweeper.deadline_lookahead_hours);
    let applications = ctx
        .repos
        .applications
        .find_open_with_deadline_before(cutoff)
        .await?;

    let mut created = 0;
    for application in applications {
        let Some(deadline) = application.deadline else {
            continue;
        };
        if deadline <= now {
            // overdue, not approaching
            continue;
        }

        let existing = ctx
            .repos
            .notifications
            .find_by_application_and_type(application.id, NotificationType::DeadlineApproaching)
            .await?;
        let already_announced = existing
            .iter()
            .any(|n| n.data["deadline"] == deadline.to_rfc3339());
        if already_announced {
            continue;
        }

        if let Err(e) = helpers::notify_deadline_reminder(notify, &application, deadline).await {
            tracing::error!(
                "Failed to create deadline reminder for {}: {}",
                application.number,
                e
            );
            continue;
        }
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    use caseflow_core::types::{
        ApplicationStatus, NewApplication, NewNotification, NotificationChannel,
        NotificationStatus, User,
    };
    use caseflow_core::Config;
    use caseflow_delivery::{
        ChannelSender, DeliveryFailure, OutboundMessage, ProviderMessageId, SenderRegistry,
    };

    struct ScriptedSender {
        result: std::result::Result<String, DeliveryFailure>,
    }

    #[async_trait::async_trait]
    impl ChannelSender for ScriptedSender {
        async fn send(
            &self,
            _message: &OutboundMessage,
        ) -> std::result::Result<ProviderMessageId, DeliveryFailure> {
            self.result.clone()
        }
    }

    async fn setup(
        result: std::result::Result<String, DeliveryFailure>,
    ) -> (AppContext, Arc<NotificationService>, User) {
        let ctx = AppContext::inmemory(Config::from_env());
        let user = ctx
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

        let mut registry = SenderRegistry::new(Duration::from_secs(5));
        registry.register(NotificationChannel::Email, Arc::new(ScriptedSender { result }));
        let notify = Arc::new(NotificationService::new(ctx.clone(), Arc::new(registry)));
        (ctx, notify, user)
    }

    fn pending_email(recipient_id: i64) -> NewNotification {
        NewNotification::new(
            recipient_id,
            caseflow_core::types::NotificationType::Reminder,
            NotificationChannel::Email,
            "sweep me",
        )
    }

    #[tokio::test]
    async fn due_rows_are_dispatched() {
        let (ctx, notify, user) = setup(Ok("prov-1".into())).await;
        let n = ctx
            .repos
            .notifications
            .insert(pending_email(user.id))
            .await
            .unwrap();

        let stats = sweep_once(&ctx, &notify).await.unwrap();
        assert_eq!(stats.dispatched, 1);

        let stored = ctx.repos.notifications.find(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn future_rows_are_left_alone() {
        let (ctx, notify, user) = setup(Ok("prov-1".into())).await;
        let mut new = pending_email(user.id);
        new.scheduled_at = Some(Utc::now() + ChronoDuration::hours(2));
        let n = ctx.repos.notifications.insert(new).await.unwrap();

        let stats = sweep_once(&ctx, &notify).await.unwrap();
        assert_eq!(stats.dispatched, 0);
        let stored = ctx.repos.notifications.find(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_after_max_attempts() {
        let (ctx, notify, user) =
            setup(Err(DeliveryFailure::Transport("gateway down".into()))).await;
        let n = ctx
            .repos
            .notifications
            .insert(pending_email(user.id))
            .await
            .unwrap();

        for expected_attempts in 1..=3 {
            sweep_once(&ctx, &notify).await.unwrap();
            let stored = ctx.repos.notifications.find(n.id).await.unwrap().unwrap();
            assert_eq!(stored.attempts, expected_attempts);
        }

        let stored = ctx.repos.notifications.find(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);

        // a failed row is no longer due
        let stats = sweep_once(&ctx, &notify).await.unwrap();
        assert_eq!(stats.dispatched, 0);

        let outbox = ctx.repos.outbox.find_for_notification(n.id).await.unwrap();
        assert_eq!(outbox.len(), 3, "one audit row per attempt");
    }

    #[tokio::test]
    async fn deadline_reminders_are_created_once_per_deadline() {
        let (ctx, notify, user) = setup(Ok("prov-1".into())).await;
        let deadline = Utc::now() + ChronoDuration::hours(3);
        let app = ctx
            .repos
            .applications
            .insert(NewApplication {
                number: "APP-SW-1".into(),
                applicant_id: user.id,
                assigned_to: None,
                subject: "Deadline case".into(),
                description: String::new(),
                deadline: Some(deadline),
            })
            .await
            .unwrap();

        let first = sweep_once(&ctx, &notify).await.unwrap();
        assert_eq!(first.reminders, 1);
        let second = sweep_once(&ctx, &notify).await.unwrap();
        assert_eq!(second.reminders, 0, "same deadline is announced once");

        let reminders = ctx
            .repos
            .notifications
            .find_by_application_and_type(app.id, NotificationType::DeadlineApproaching)
            .await
            .unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].recipient_id, user.id);
    }

    #[tokio::test]
    async fn each_application_gets_its_own_reminder() {
        let (ctx, notify, user) = setup(Ok("prov-1".into())).await;
        for number in ["APP-SW-2", "APP-SW-2B"] {
            ctx.repos
                .applications
                .insert(NewApplication {
                    number: number.into(),
                    applicant_id: user.id,
                    assigned_to: None,
                    subject: "Deadline case".into(),
                    description: String::new(),
                    deadline: Some(Utc::now() + ChronoDuration::hours(3)),
                })
                .await
                .unwrap();
        }

        assert_eq!(sweep_once(&ctx, &notify).await.unwrap().reminders, 2);
        assert_eq!(sweep_once(&ctx, &notify).await.unwrap().reminders, 0);
    }

    #[tokio::test]
    async fn far_and_closed_deadlines_are_skipped() {
        let (ctx, notify, user) = setup(Ok("prov-1".into())).await;
        ctx.repos
            .applications
            .insert(NewApplication {
                number: "APP-SW-3".into(),
                applicant_id: user.id,
                assigned_to: None,
                subject: "Far away".into(),
                description: String::new(),
                deadline: Some(Utc::now() + ChronoDuration::days(30)),
            })
            .await
            .unwrap();
        let closed = ctx
            .repos
            .applications
            .insert(NewApplication {
                number: "APP-SW-4".into(),
                applicant_id: user.id,
                assigned_to: None,
                subject: "Already done".into(),
                description: String::new(),
                deadline: Some(Utc::now() + ChronoDuration::hours(3)),
            })
            .await
            .unwrap();
        ctx.repos
            .applications
            .transition_status(closed.id, ApplicationStatus::Completed, None, None)
            .await
            .unwrap();

        let stats = sweep_once(&ctx, &notify).await.unwrap();
        assert_eq!(stats.reminders, 0);
    }
}
