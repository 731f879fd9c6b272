//! DunningScheduler - background follow-up for past-due agreements.
//!
//! Holds one task per past-due agreement. Each tick loads the due tasks,
//! asks the reconciliation engine to re-check the grace window, and then
//! either sends a reminder, waits for the deadline, or drops the task.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `sweep_interval` | 60s | How often due tasks are checked |
//! | `batch_size` | 100 | Max tasks handled per tick |
//! | `event_retention` | 30 days | Age after which processed events are purged |
//!
//! ## Graceful Shutdown
//!
//! The loop listens on a watch channel and exits after the current tick.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

use crate::domain::billing::{DunningPolicy, NotificationKind};
use crate::domain::foundation::{AgreementId, DomainError, Timestamp};
use crate::ports::{DunningTaskStore, EventDeduplicator, Notification};

use super::errors::BillingError;
use super::notifications::NotificationQueue;

/// Result of re-checking an agreement's grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceCheck {
    /// The window elapsed and the agreement is now suspended.
    Suspended,
    /// Still past due; the window closes at `grace_deadline`.
    StillPastDue { grace_deadline: Timestamp },
    /// No longer past due (paid, terminated, or already suspended).
    Resolved,
}

/// Grace-window evaluation, implemented by the reconciliation engine.
#[async_trait]
pub trait GraceExpiry: Send + Sync {
    async fn expire_grace(
        &self,
        agreement_id: AgreementId,
        now: Timestamp,
    ) -> Result<GraceCheck, BillingError>;
}

/// Configuration for the scheduler loop.
#[derive(Debug, Clone)]
pub struct DunningSchedulerConfig {
    pub sweep_interval: Duration,
    pub batch_size: usize,
    pub event_retention: chrono::Duration,
}

impl Default for DunningSchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            batch_size: 100,
            event_retention: chrono::Duration::days(30),
        }
    }
}

impl DunningSchedulerConfig {
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_event_retention(mut self, retention: chrono::Duration) -> Self {
        self.event_retention = retention;
        self
    }
}

/// Counts from one tick, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub reminded: usize,
    pub suspended: usize,
    pub resolved: usize,
    pub failed: usize,
}

/// Dunning scheduler.
pub struct DunningScheduler {
    store: Arc<dyn DunningTaskStore>,
    notifications: NotificationQueue,
    policy: DunningPolicy,
    config: DunningSchedulerConfig,
}

impl DunningScheduler {
    pub fn new(
        store: Arc<dyn DunningTaskStore>,
        notifications: NotificationQueue,
        policy: DunningPolicy,
    ) -> Self {
        Self::with_config(store, notifications, policy, DunningSchedulerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn DunningTaskStore>,
        notifications: NotificationQueue,
        policy: DunningPolicy,
        config: DunningSchedulerConfig,
    ) -> Self {
        Self {
            store,
            notifications,
            policy,
            config,
        }
    }

    /// Starts (or restarts) dunning after a newer failed invoice.
    ///
    /// A task already running for the same grace deadline is kept, so a
    /// redelivered failure does not reset the reminder cadence.
    pub async fn on_payment_failed(
        &self,
        agreement_id: AgreementId,
        grace_deadline: Timestamp,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if let Some(existing) = self.store.get(agreement_id).await? {
            if existing.grace_deadline == grace_deadline {
                return Ok(());
            }
        }

        let task = self.policy.start(agreement_id, grace_deadline, now);
        tracing::debug!(
            agreement_id = %agreement_id,
            next_check_at = %task.next_check_at,
            grace_deadline = %grace_deadline,
            "Dunning scheduled"
        );
        self.store.upsert(&task).await
    }

    /// Drops any pending dunning for the agreement.
    pub async fn clear(&self, agreement_id: AgreementId) -> Result<(), DomainError> {
        if self.store.remove(agreement_id).await? {
            tracing::debug!(agreement_id = %agreement_id, "Dunning cleared");
        }
        Ok(())
    }

    /// Handles every task due at `now`.
    pub async fn tick(
        &self,
        now: Timestamp,
        engine: &dyn GraceExpiry,
    ) -> Result<TickReport, DomainError> {
        let due = self.store.due(now, self.config.batch_size).await?;
        let mut report = TickReport::default();

        for task in due {
            report.checked += 1;
            let agreement_id = task.agreement_id;

            match engine.expire_grace(agreement_id, now).await {
                Ok(GraceCheck::Suspended) => {
                    report.suspended += 1;
                    self.store.remove(agreement_id).await?;
                }
                Ok(GraceCheck::Resolved) | Err(BillingError::NotFound(_)) => {
                    report.resolved += 1;
                    self.store.remove(agreement_id).await?;
                }
                Ok(GraceCheck::StillPastDue { grace_deadline }) => {
                    let task = if task.grace_deadline == grace_deadline {
                        task
                    } else {
                        self.policy.start(agreement_id, grace_deadline, now)
                    };

                    let next = if self.policy.may_remind(&task) {
                        self.notifications.enqueue(Notification {
                            agreement_id,
                            kind: NotificationKind::PaymentReminder,
                            occurred_at: now,
                        });
                        report.reminded += 1;
                        self.policy.after_reminder(&task, now)
                    } else {
                        self.policy.await_deadline(&task)
                    };
                    self.store.upsert(&next).await?;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        agreement_id = %agreement_id,
                        error = %e,
                        "Grace check failed, will retry next tick"
                    );
                }
            }
        }

        if report.checked > 0 {
            tracing::info!(
                checked = report.checked,
                reminded = report.reminded,
                suspended = report.suspended,
                resolved = report.resolved,
                failed = report.failed,
                "Dunning tick complete"
            );
        }
        Ok(report)
    }

    /// Runs ticks on the sweep interval until shutdown.
    ///
    /// When `deduplicator` is given, processed-event records older than the
    /// retention window are purged on each tick as well.
    pub async fn run(
        self: Arc<Self>,
        engine: Arc<dyn GraceExpiry>,
        deduplicator: Option<Arc<dyn EventDeduplicator>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = time::interval(self.config.sweep_interval);
        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "Dunning scheduler starting"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let now = Timestamp::now();
                    if let Err(e) = self.tick(now, engine.as_ref()).await {
                        tracing::error!(error = %e, "Dunning tick failed");
                    }
                    if let Some(deduplicator) = &deduplicator {
                        self.purge_events(deduplicator.as_ref(), now).await;
                    }
                }
            }
        }

        tracing::info!("Dunning scheduler stopped");
    }

    async fn purge_events(&self, deduplicator: &dyn EventDeduplicator, now: Timestamp) {
        let cutoff = now.plus(-self.config.event_retention);
        match deduplicator.purge_before(cutoff).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "Purged processed events"),
            Err(e) => tracing::warn!(error = %e, "Processed event purge failed"),
        }
    }
}
