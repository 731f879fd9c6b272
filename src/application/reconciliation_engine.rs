//! ReconciliationEngine - the single writer of agreement state.
//!
//! Every input (webhook, gateway ack, local cancel, grace check) goes
//! through [`ReconciliationEngine::apply`]:
//!
//! 1. take the per-agreement lock
//! 2. read the agreement and whether the payment is already recorded
//! 3. ask the pure `reconcile` function for a decision
//! 4. commit it with one compare-and-swap, retrying on conflict
//! 5. only then dispatch the decision's effects
//!
//! A writer that loses the compare-and-swap re-reads and recomputes, so
//! effects are dispatched exactly once per committed transition.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::billing::{
    reconcile, Agreement, AgreementStatus, DecisionOutcome, Effect, ReconcileInput,
    ReconcilePolicy, SubscriptionRef,
};
use crate::domain::foundation::{AgreementId, Timestamp};
use crate::ports::{AgreementLedger, CasOutcome, Notification};

use super::agreement_locks::AgreementLocks;
use super::dunning_scheduler::{DunningScheduler, GraceCheck, GraceExpiry};
use super::errors::BillingError;
use super::notifications::NotificationQueue;

const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// What one `apply` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Agreement as stored after the call.
    pub agreement: Agreement,
    pub outcome: DecisionOutcome,
    /// True if this call committed a write.
    pub committed: bool,
    /// True if this call appended a payment record.
    pub payment_recorded: bool,
}

impl ApplyOutcome {
    /// Status before the call, if it changed.
    pub fn previous_status(&self) -> Option<AgreementStatus> {
        match self.outcome {
            DecisionOutcome::Transitioned { from, .. } => Some(from),
            _ => None,
        }
    }
}

/// Reconciliation engine.
pub struct ReconciliationEngine {
    ledger: Arc<dyn AgreementLedger>,
    scheduler: Arc<DunningScheduler>,
    notifications: NotificationQueue,
    locks: AgreementLocks,
    policy: ReconcilePolicy,
    max_conflict_retries: u32,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<dyn AgreementLedger>,
        scheduler: Arc<DunningScheduler>,
        notifications: NotificationQueue,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            notifications,
            locks: AgreementLocks::new(),
            policy,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries.max(1);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn AgreementLedger> {
        &self.ledger
    }

    /// Applies one input to one agreement.
    ///
    /// `source` identifies the trigger in logs (an event id or an operation).
    ///
    /// # Errors
    ///
    /// - `NotFound` - no such agreement
    /// - `NotReady` - the input must wait for an earlier one (e.g. an
    ///   invoice before the subscription ack); redeliver later
    /// - `InvalidTransition` - the transition table forbids the input
    /// - `LedgerConflict` - compare-and-swap kept losing
    /// - `Storage` - ledger failure
    pub async fn apply(
        &self,
        agreement_id: AgreementId,
        input: ReconcileInput,
        source: &str,
        now: Timestamp,
    ) -> Result<ApplyOutcome, BillingError> {
        let _guard = self.locks.acquire(agreement_id).await;

        for attempt in 1..=self.max_conflict_retries {
            let current = self
                .ledger
                .get(agreement_id)
                .await?
                .ok_or(BillingError::NotFound(agreement_id))?;

            let payment_recorded = match input.payment_key() {
                Some(key) => self.ledger.has_payment(agreement_id, &key).await?,
                None => false,
            };

            let decision = reconcile(&current, &input, payment_recorded, &self.policy, now);

            match &decision.outcome {
                DecisionOutcome::Deferred { reason } => {
                    tracing::info!(
                        agreement_id = %agreement_id,
                        source,
                        input = input.label(),
                        reason,
                        "Input deferred"
                    );
                    return Err(BillingError::NotReady(agreement_id, reason.to_string()));
                }
                DecisionOutcome::Rejected { reason } => {
                    return Err(BillingError::InvalidTransition(reason.clone()));
                }
                _ => {}
            }

            let Some(next) = decision.next else {
                tracing::debug!(
                    agreement_id = %agreement_id,
                    source,
                    input = input.label(),
                    outcome = ?decision.outcome,
                    "No change"
                );
                self.dispatch(agreement_id, decision.effects, source, now)
                    .await?;
                return Ok(ApplyOutcome {
                    agreement: current,
                    outcome: decision.outcome,
                    committed: false,
                    payment_recorded: false,
                });
            };

            match self
                .ledger
                .compare_and_swap(current.version, &next, decision.payment.as_ref())
                .await?
            {
                CasOutcome::Committed { payment_inserted } => {
                    tracing::info!(
                        agreement_id = %agreement_id,
                        source,
                        input = input.label(),
                        from = %current.status,
                        to = %next.status,
                        version = next.version,
                        payment_inserted,
                        "Agreement updated"
                    );
                    self.dispatch(agreement_id, decision.effects, source, now)
                        .await?;
                    return Ok(ApplyOutcome {
                        agreement: next,
                        outcome: decision.outcome,
                        committed: true,
                        payment_recorded: payment_inserted,
                    });
                }
                CasOutcome::Conflict => {
                    tracing::warn!(
                        agreement_id = %agreement_id,
                        source,
                        attempt,
                        expected_version = current.version,
                        "Ledger conflict, re-reading"
                    );
                }
            }
        }

        tracing::error!(
            agreement_id = %agreement_id,
            source,
            attempts = self.max_conflict_retries,
            alert = true,
            "Ledger conflict retries exhausted"
        );
        Err(BillingError::LedgerConflict {
            agreement_id,
            attempts: self.max_conflict_retries,
        })
    }

    /// Records the gateway's acknowledgement of a created subscription.
    pub async fn acknowledge_subscription(
        &self,
        agreement_id: AgreementId,
        subscription: SubscriptionRef,
        now: Timestamp,
    ) -> Result<ApplyOutcome, BillingError> {
        self.apply(
            agreement_id,
            ReconcileInput::SubscriptionAcknowledged(subscription),
            "gateway_ack",
            now,
        )
        .await
    }

    /// Terminates locally, after any remote cancellation succeeded.
    ///
    /// Returns `NotReady` if the agreement is no longer bound to
    /// `expected_subscription`.
    pub async fn terminate(
        &self,
        agreement_id: AgreementId,
        expected_subscription: Option<&str>,
        now: Timestamp,
    ) -> Result<ApplyOutcome, BillingError> {
        let input = ReconcileInput::LocalTermination {
            expected_subscription: expected_subscription.map(str::to_string),
        };
        self.apply(agreement_id, input, "local_cancel", now).await
    }

    /// Dispatches effects on a detached task, so a caller dropped after
    /// the commit cannot lose them.
    ///
    /// A failed dunning schedule is returned as `Storage`; the write stays
    /// committed and a redelivery of the failed invoice schedules it again.
    /// Other failures are only logged.
    async fn dispatch(
        &self,
        agreement_id: AgreementId,
        effects: Vec<Effect>,
        source: &str,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        if effects.is_empty() {
            return Ok(());
        }

        let scheduler = self.scheduler.clone();
        let notifications = self.notifications.clone();
        let source = source.to_string();
        let task = tokio::spawn(async move {
            dispatch_effects(&scheduler, &notifications, agreement_id, &effects, &source, now)
                .await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    agreement_id = %agreement_id,
                    error = %e,
                    alert = true,
                    "Effect dispatch task aborted"
                );
                Ok(())
            }
        }
    }
}

async fn dispatch_effects(
    scheduler: &DunningScheduler,
    notifications: &NotificationQueue,
    agreement_id: AgreementId,
    effects: &[Effect],
    source: &str,
    now: Timestamp,
) -> Result<(), BillingError> {
    let mut schedule_failure = None;

    for effect in effects {
        let result = match effect {
            Effect::Notify(kind) => {
                notifications.enqueue(Notification {
                    agreement_id,
                    kind: *kind,
                    occurred_at: now,
                });
                Ok(())
            }
            Effect::ScheduleDunning { grace_deadline } => scheduler
                .on_payment_failed(agreement_id, *grace_deadline, now)
                .await
                .map_err(|e| {
                    schedule_failure = Some(e.clone());
                    e
                }),
            Effect::ClearDunning => scheduler.clear(agreement_id).await,
        };

        if let Err(e) = result {
            tracing::error!(
                agreement_id = %agreement_id,
                source,
                effect = ?effect,
                error = %e,
                alert = true,
                "Effect dispatch failed"
            );
        }
    }

    match schedule_failure {
        Some(e) => Err(BillingError::Storage(e)),
        None => Ok(()),
    }
}

#[async_trait]
impl GraceExpiry for ReconciliationEngine {
    async fn expire_grace(
        &self,
        agreement_id: AgreementId,
        now: Timestamp,
    ) -> Result<GraceCheck, BillingError> {
        let applied = self
            .apply(agreement_id, ReconcileInput::GraceCheck, "grace_check", now)
            .await?;

        Ok(match applied.agreement.status {
            AgreementStatus::Suspended if applied.committed => GraceCheck::Suspended,
            AgreementStatus::PastDue => match applied.agreement.grace_deadline {
                Some(grace_deadline) => GraceCheck::StillPastDue { grace_deadline },
                None => GraceCheck::Resolved,
            },
            _ => GraceCheck::Resolved,
        })
    }
}
