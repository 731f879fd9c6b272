//! CancelAgreementHandler - Command handler for ending an agreement.
//!
//! A draft has no remote subscription and is terminated locally. Otherwise
//! the processor is told first; an immediate cancel then terminates the
//! agreement locally, while an end-of-period cancel only flags the remote
//! subscription and waits for the processor's deletion webhook.

use std::sync::Arc;

use crate::application::errors::BillingError;
use crate::application::gateway_retry::RetryPolicy;
use crate::application::reconciliation_engine::ReconciliationEngine;
use crate::domain::billing::{Agreement, AgreementStatus};
use crate::domain::foundation::{AgreementId, Timestamp};
use crate::ports::{
    AgreementLedger, CancelAck, CancelMode, GatewayOperation, IdempotencyKey, SubscriptionGateway,
};

/// Reads of the agreement before giving up on a moving target.
const MAX_CANCEL_ROUNDS: u32 = 3;

/// Command to cancel an agreement.
#[derive(Debug, Clone)]
pub struct CancelAgreementCommand {
    pub agreement_id: AgreementId,
    pub at_period_end: bool,
}

/// Result of a cancellation.
#[derive(Debug, Clone)]
pub struct CancelAgreementResult {
    pub agreement: Agreement,
    /// Processor acknowledgement, when a remote call was made.
    pub remote: Option<CancelAck>,
}

/// Handler for cancelling agreements.
pub struct CancelAgreementHandler {
    engine: Arc<ReconciliationEngine>,
    gateway: Arc<dyn SubscriptionGateway>,
    retry: RetryPolicy,
}

impl CancelAgreementHandler {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        gateway: Arc<dyn SubscriptionGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            gateway,
            retry,
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelAgreementCommand,
        now: Timestamp,
    ) -> Result<CancelAgreementResult, BillingError> {
        for round in 1..=MAX_CANCEL_ROUNDS {
            let agreement = self
                .engine
                .ledger()
                .get(cmd.agreement_id)
                .await?
                .ok_or(BillingError::NotFound(cmd.agreement_id))?;

            match self.cancel_as_read(&cmd, agreement, now).await {
                // A subscription was bound after the read
                Err(BillingError::NotReady(..)) => {
                    tracing::info!(
                        agreement_id = %cmd.agreement_id,
                        round,
                        "Agreement changed during cancellation, re-reading"
                    );
                }
                result => return result,
            }
        }

        Err(BillingError::LedgerConflict {
            agreement_id: cmd.agreement_id,
            attempts: MAX_CANCEL_ROUNDS,
        })
    }

    async fn cancel_as_read(
        &self,
        cmd: &CancelAgreementCommand,
        agreement: Agreement,
        now: Timestamp,
    ) -> Result<CancelAgreementResult, BillingError> {
        if agreement.status == AgreementStatus::Terminated {
            return Ok(CancelAgreementResult {
                agreement,
                remote: None,
            });
        }

        let Some(subscription) = agreement.subscription.clone() else {
            // Draft: nothing exists remotely yet
            let applied = self.engine.terminate(cmd.agreement_id, None, now).await?;
            return Ok(CancelAgreementResult {
                agreement: applied.agreement,
                remote: None,
            });
        };

        let (mode, operation) = if cmd.at_period_end {
            (CancelMode::AtPeriodEnd, GatewayOperation::CancelAtPeriodEnd)
        } else {
            (CancelMode::Immediately, GatewayOperation::CancelSubscription)
        };
        let key = IdempotencyKey::derive(cmd.agreement_id, operation);

        let ack = self
            .retry
            .run("cancel_subscription", &key, || {
                self.gateway
                    .cancel_subscription(&subscription.subscription_id, mode, &key)
            })
            .await?;

        tracing::info!(
            agreement_id = %cmd.agreement_id,
            subscription_id = %subscription.subscription_id,
            mode = ?mode,
            remote_status = %ack.status,
            "Subscription cancel acknowledged"
        );

        let agreement = match mode {
            CancelMode::Immediately => {
                self.engine
                    .terminate(cmd.agreement_id, Some(&subscription.subscription_id), now)
                    .await?
                    .agreement
            }
            CancelMode::AtPeriodEnd => agreement,
        };

        Ok(CancelAgreementResult {
            agreement,
            remote: Some(ack),
        })
    }
}

/// Cancels a remote subscription whose agreement was terminated before
/// the subscription could be bound to it.
pub(crate) async fn cancel_orphan(
    gateway: &dyn SubscriptionGateway,
    retry: &RetryPolicy,
    agreement_id: AgreementId,
    subscription_id: &str,
) {
    let key = IdempotencyKey::derive(agreement_id, GatewayOperation::CancelOrphan);
    tracing::warn!(
        agreement_id = %agreement_id,
        subscription_id,
        "Subscription created for a terminated agreement, cancelling"
    );

    let result = retry
        .run("cancel_orphan", &key, || {
            gateway.cancel_subscription(subscription_id, CancelMode::Immediately, &key)
        })
        .await;

    if let Err(e) = result {
        tracing::error!(
            agreement_id = %agreement_id,
            subscription_id,
            error = %e,
            alert = true,
            "Failed to cancel orphaned subscription"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryAgreementLedger, InMemoryDunningStore};
    use crate::adapters::notifications::RecordingNotificationSink;
    use crate::adapters::stripe::MockSubscriptionGateway;
    use crate::application::dunning_scheduler::DunningScheduler;
    use crate::application::notifications::notification_channel;
    use crate::domain::billing::{
        BillingTerms, DunningPolicy, Payment, PaymentKey, ReconcilePolicy, SubscriptionRef,
    };
    use crate::domain::foundation::{DomainError, PropertyId, TenantId};
    use crate::ports::{CasOutcome, GatewayError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Ledger that stalls the first `get` after it is armed, once the
    /// read has been taken.
    struct PausingLedger {
        inner: Arc<InMemoryAgreementLedger>,
        armed: AtomicBool,
        paused: Notify,
        resume: Notify,
    }

    impl PausingLedger {
        fn new(inner: Arc<InMemoryAgreementLedger>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
                paused: Notify::new(),
                resume: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl AgreementLedger for PausingLedger {
        async fn insert(&self, agreement: &Agreement) -> Result<(), DomainError> {
            self.inner.insert(agreement).await
        }

        async fn get(&self, id: AgreementId) -> Result<Option<Agreement>, DomainError> {
            let read = self.inner.get(id).await;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.paused.notify_one();
                self.resume.notified().await;
            }
            read
        }

        async fn compare_and_swap(
            &self,
            expected_version: u64,
            next: &Agreement,
            payment: Option<&Payment>,
        ) -> Result<CasOutcome, DomainError> {
            self.inner.compare_and_swap(expected_version, next, payment).await
        }

        async fn find_by_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<Option<Agreement>, DomainError> {
            self.inner.find_by_subscription(subscription_id).await
        }

        async fn payments(&self, id: AgreementId) -> Result<Vec<Payment>, DomainError> {
            self.inner.payments(id).await
        }

        async fn has_payment(&self, id: AgreementId, key: &PaymentKey) -> Result<bool, DomainError> {
            self.inner.has_payment(id, key).await
        }
    }

    struct Fixture {
        handler: CancelAgreementHandler,
        engine: Arc<ReconciliationEngine>,
        ledger: Arc<InMemoryAgreementLedger>,
        gateway: MockSubscriptionGateway,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryAgreementLedger::new());
        fixture_over(ledger.clone(), ledger)
    }

    fn fixture_over(
        ledger: Arc<InMemoryAgreementLedger>,
        engine_ledger: Arc<dyn AgreementLedger>,
    ) -> Fixture {
        let (queue, _dispatcher) =
            notification_channel(16, Arc::new(RecordingNotificationSink::new()));
        let scheduler = Arc::new(DunningScheduler::new(
            Arc::new(InMemoryDunningStore::new()),
            queue.clone(),
            DunningPolicy::default(),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            engine_ledger,
            scheduler,
            queue,
            ReconcilePolicy::default(),
        ));
        let gateway = MockSubscriptionGateway::new();
        let handler = CancelAgreementHandler::new(
            engine.clone(),
            Arc::new(gateway.clone()),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );
        Fixture {
            handler,
            engine,
            ledger,
            gateway,
        }
    }

    async fn insert_draft(ledger: &InMemoryAgreementLedger) -> AgreementId {
        let agreement = Agreement::draft(
            AgreementId::new(),
            TenantId::new(),
            PropertyId::new(),
            BillingTerms::new(90_000, "eur", 15).unwrap(),
            Timestamp::now(),
        );
        ledger.insert(&agreement).await.unwrap();
        agreement.id
    }

    async fn insert_pending(f: &Fixture) -> AgreementId {
        let id = insert_draft(&f.ledger).await;
        f.engine
            .acknowledge_subscription(
                id,
                SubscriptionRef {
                    subscription_id: "sub_42".to_string(),
                    customer_id: "cus_1".to_string(),
                    attached_at: Timestamp::now(),
                },
                Timestamp::now(),
            )
            .await
            .unwrap();
        id
    }

    fn cancel(agreement_id: AgreementId, at_period_end: bool) -> CancelAgreementCommand {
        CancelAgreementCommand {
            agreement_id,
            at_period_end,
        }
    }

    #[tokio::test]
    async fn draft_is_terminated_without_remote_call() {
        let f = fixture();
        let id = insert_draft(&f.ledger).await;

        let result = f.handler.handle(cancel(id, false), Timestamp::now()).await.unwrap();

        assert_eq!(result.agreement.status, AgreementStatus::Terminated);
        assert!(result.remote.is_none());
        assert!(!f.gateway.was_called("cancel_subscription"));
    }

    #[tokio::test]
    async fn immediate_cancel_terminates_after_remote_ack() {
        let f = fixture();
        let id = insert_pending(&f).await;

        let result = f.handler.handle(cancel(id, false), Timestamp::now()).await.unwrap();

        assert_eq!(result.agreement.status, AgreementStatus::Terminated);
        assert_eq!(f.gateway.canceled_subscriptions(), vec!["sub_42".to_string()]);
    }

    #[tokio::test]
    async fn period_end_cancel_keeps_agreement_running() {
        let f = fixture();
        let id = insert_pending(&f).await;

        let result = f.handler.handle(cancel(id, true), Timestamp::now()).await.unwrap();

        assert_eq!(result.agreement.status, AgreementStatus::PendingActivation);
        assert!(result.remote.unwrap().cancel_at_period_end);
    }

    #[tokio::test]
    async fn remote_failure_leaves_agreement_untouched() {
        let f = fixture();
        let id = insert_pending(&f).await;
        f.gateway
            .fail_next("cancel_subscription", GatewayError::from_status(404, "gone"));

        let err = f.handler.handle(cancel(id, false), Timestamp::now()).await.unwrap_err();

        assert!(matches!(err, BillingError::Gateway(_)));
        assert_eq!(
            f.ledger.get(id).await.unwrap().unwrap().status,
            AgreementStatus::PendingActivation
        );
    }

    #[tokio::test]
    async fn cancelling_twice_is_a_no_op() {
        let f = fixture();
        let id = insert_pending(&f).await;
        f.handler.handle(cancel(id, false), Timestamp::now()).await.unwrap();

        let again = f.handler.handle(cancel(id, false), Timestamp::now()).await.unwrap();

        assert_eq!(again.agreement.status, AgreementStatus::Terminated);
        assert_eq!(f.gateway.call_count("cancel_subscription"), 1);
    }

    #[tokio::test]
    async fn subscription_bound_after_draft_read_is_cancelled_remotely() {
        let inner = Arc::new(InMemoryAgreementLedger::new());
        let pausing = Arc::new(PausingLedger::new(inner.clone()));
        let f = Arc::new(fixture_over(inner, pausing.clone()));
        let id = insert_draft(&f.ledger).await;

        pausing.armed.store(true, Ordering::SeqCst);
        let cancel_task = {
            let f = f.clone();
            tokio::spawn(async move { f.handler.handle(cancel(id, false), Timestamp::now()).await })
        };

        // The cancel has read the draft; the create call now lands
        pausing.paused.notified().await;
        let bound = f
            .engine
            .acknowledge_subscription(
                id,
                SubscriptionRef {
                    subscription_id: "sub_late".to_string(),
                    customer_id: "cus_1".to_string(),
                    attached_at: Timestamp::now(),
                },
                Timestamp::now(),
            )
            .await
            .unwrap();
        assert_eq!(bound.agreement.status, AgreementStatus::PendingActivation);
        pausing.resume.notify_one();

        let result = cancel_task.await.unwrap().unwrap();

        assert_eq!(result.agreement.status, AgreementStatus::Terminated);
        assert_eq!(f.gateway.canceled_subscriptions(), vec!["sub_late".to_string()]);
        assert!(result.remote.is_some());
    }

    #[tokio::test]
    async fn unknown_agreement_is_not_found() {
        let f = fixture();
        let err = f
            .handler
            .handle(cancel(AgreementId::new(), false), Timestamp::now())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }
}
