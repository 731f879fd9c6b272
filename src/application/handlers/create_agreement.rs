//! CreateAgreementHandler - Command handler for starting a rent subscription.
//!
//! The draft is persisted before the processor is called, so every remote
//! object can be traced back to a local agreement. The gateway's answer is
//! then applied through the reconciliation engine like any other input.

use std::sync::Arc;

use crate::application::errors::BillingError;
use crate::application::gateway_retry::RetryPolicy;
use crate::application::reconciliation_engine::ReconciliationEngine;
use crate::domain::billing::{Agreement, AgreementStatus, BillingTerms, SubscriptionRef};
use crate::domain::foundation::{AgreementId, PropertyId, TenantId, Timestamp, ValidationError};
use crate::ports::{
    AgreementLedger, CreateSubscriptionRequest, CustomerProfile, GatewayOperation,
    IdempotencyKey, SubscriptionGateway,
};

use super::cancel_agreement::cancel_orphan;

/// Command to create an agreement and its remote subscription.
#[derive(Debug, Clone)]
pub struct CreateAgreementCommand {
    pub tenant_id: TenantId,
    pub property_id: PropertyId,
    /// Stored processor customer id (`cus_...`). Verified remotely; when
    /// absent or no longer known a customer is created for the tenant.
    pub customer_id: Option<String>,
    pub tenant_email: Option<String>,
    pub tenant_name: Option<String>,
    /// Processor payment method id (`pm_...`).
    pub payment_method_id: String,
    pub monthly_amount_minor: i64,
    pub currency: String,
    pub billing_anchor_day: u8,
}

/// Result of agreement creation.
#[derive(Debug, Clone)]
pub struct CreateAgreementResult {
    pub agreement: Agreement,
}

/// Handler for creating agreements.
pub struct CreateAgreementHandler {
    engine: Arc<ReconciliationEngine>,
    gateway: Arc<dyn SubscriptionGateway>,
    retry: RetryPolicy,
}

impl CreateAgreementHandler {
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
        cmd: CreateAgreementCommand,
        now: Timestamp,
    ) -> Result<CreateAgreementResult, BillingError> {
        // 1. Validate
        let terms = BillingTerms::new(cmd.monthly_amount_minor, &cmd.currency, cmd.billing_anchor_day)?;
        if cmd.payment_method_id.trim().is_empty() {
            return Err(ValidationError::empty_field("payment_method_id").into());
        }

        // 2. Persist the draft
        let agreement = Agreement::draft(
            AgreementId::new(),
            cmd.tenant_id,
            cmd.property_id,
            terms,
            now,
        );
        let agreement_id = agreement.id;
        self.engine.ledger().insert(&agreement).await?;
        tracing::info!(
            agreement_id = %agreement_id,
            tenant_id = %cmd.tenant_id,
            property_id = %cmd.property_id,
            "Agreement drafted"
        );

        // 3. Remote setup
        let subscription = match self.create_remote(&cmd, &agreement, now).await {
            Ok(subscription) => subscription,
            Err(e) => return Err(self.abandon_draft(agreement_id, e, now).await),
        };

        // 4. Apply the acknowledgement
        let applied = self
            .engine
            .acknowledge_subscription(agreement_id, subscription.clone(), now)
            .await?;

        if applied.agreement.status == AgreementStatus::Terminated && !applied.committed {
            // Cancelled while the create call was in flight
            cancel_orphan(
                self.gateway.as_ref(),
                &self.retry,
                agreement_id,
                &subscription.subscription_id,
            )
            .await;
        }

        Ok(CreateAgreementResult {
            agreement: applied.agreement,
        })
    }

    async fn create_remote(
        &self,
        cmd: &CreateAgreementCommand,
        agreement: &Agreement,
        now: Timestamp,
    ) -> Result<SubscriptionRef, BillingError> {
        let customer_key = IdempotencyKey::derive(agreement.id, GatewayOperation::CreateCustomer);
        let stored_customer = cmd
            .customer_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let profile = CustomerProfile {
            tenant_id: cmd.tenant_id,
            email: cmd.tenant_email.clone(),
            name: cmd.tenant_name.clone(),
        };
        let customer_id = self
            .retry
            .run("ensure_customer", &customer_key, || {
                self.gateway
                    .ensure_customer(stored_customer, &profile, &customer_key)
            })
            .await?;
        if stored_customer != Some(customer_id.as_str()) {
            tracing::info!(
                agreement_id = %agreement.id,
                tenant_id = %cmd.tenant_id,
                customer_id = %customer_id,
                "Processor customer created for tenant"
            );
        }

        let attach_key =
            IdempotencyKey::derive(agreement.id, GatewayOperation::AttachPaymentMethod);
        self.retry
            .run("attach_payment_method", &attach_key, || {
                self.gateway
                    .attach_payment_method(&customer_id, &cmd.payment_method_id, &attach_key)
            })
            .await?;

        let create_key = IdempotencyKey::derive(agreement.id, GatewayOperation::CreateSubscription);
        let request = CreateSubscriptionRequest {
            agreement_id: agreement.id,
            customer_id,
            payment_method_id: cmd.payment_method_id.clone(),
            amount_minor: agreement.terms.monthly_amount_minor,
            currency: agreement.terms.currency.clone(),
            billing_anchor: agreement.terms.next_anchor(now),
        };
        let subscription = self
            .retry
            .run("create_subscription", &create_key, || {
                self.gateway.create_subscription(&request, &create_key)
            })
            .await?;

        Ok(subscription)
    }

    /// Decides what happens to the draft after a failed remote setup.
    ///
    /// A permanent refusal means nothing was created remotely, so the
    /// draft is terminated. After a transient failure the processor may
    /// still have created the subscription; the draft stays open for the
    /// `customer.subscription.created` webhook to bind it.
    async fn abandon_draft(
        &self,
        agreement_id: AgreementId,
        error: BillingError,
        now: Timestamp,
    ) -> BillingError {
        if error.is_retryable() {
            tracing::warn!(
                agreement_id = %agreement_id,
                error = %error,
                "Remote setup unresolved, draft left for webhook binding"
            );
            return error;
        }

        if let Err(e) = self.engine.terminate(agreement_id, None, now).await {
            tracing::error!(
                agreement_id = %agreement_id,
                error = %e,
                "Failed to terminate abandoned draft"
            );
        }
        error
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
    use crate::domain::billing::{DunningPolicy, ReconcilePolicy};
    use crate::ports::GatewayError;
    use std::time::Duration;

    struct Fixture {
        handler: CreateAgreementHandler,
        ledger: Arc<InMemoryAgreementLedger>,
        gateway: MockSubscriptionGateway,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryAgreementLedger::new());
        let (queue, _dispatcher) =
            notification_channel(16, Arc::new(RecordingNotificationSink::new()));
        let scheduler = Arc::new(DunningScheduler::new(
            Arc::new(InMemoryDunningStore::new()),
            queue.clone(),
            DunningPolicy::default(),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            scheduler,
            queue,
            ReconcilePolicy::default(),
        ));
        let gateway = MockSubscriptionGateway::new();
        let handler = CreateAgreementHandler::new(
            engine,
            Arc::new(gateway.clone()),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        Fixture {
            handler,
            ledger,
            gateway,
        }
    }

    fn command() -> CreateAgreementCommand {
        CreateAgreementCommand {
            tenant_id: TenantId::new(),
            property_id: PropertyId::new(),
            customer_id: Some("cus_1".to_string()),
            tenant_email: Some("tenant@example.com".to_string()),
            tenant_name: None,
            payment_method_id: "pm_1".to_string(),
            monthly_amount_minor: 185_000,
            currency: "USD".to_string(),
            billing_anchor_day: 1,
        }
    }

    #[tokio::test]
    async fn creates_pending_agreement_bound_to_subscription() {
        let f = fixture();

        let result = f.handler.handle(command(), Timestamp::now()).await.unwrap();

        assert_eq!(result.agreement.status, AgreementStatus::PendingActivation);
        let subscription = result.agreement.subscription.clone().unwrap();
        assert!(subscription.subscription_id.starts_with("sub_mock_"));
        assert_eq!(result.agreement.terms.currency, "usd");

        let stored = f.ledger.get(result.agreement.id).await.unwrap().unwrap();
        assert_eq!(stored, result.agreement);
    }

    #[tokio::test]
    async fn gateway_calls_carry_agreement_scoped_keys() {
        let f = fixture();

        let result = f.handler.handle(command(), Timestamp::now()).await.unwrap();

        let keys: Vec<String> = f.gateway.calls().into_iter().map(|c| c.idempotency_key).collect();
        let id = result.agreement.id;
        assert_eq!(
            keys,
            vec![
                format!("{}:create-customer", id),
                format!("{}:attach-payment-method", id),
                format!("{}:create-subscription", id),
            ]
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_the_same_key() {
        let f = fixture();
        f.gateway
            .fail_next("create_subscription", GatewayError::network("reset"));

        let result = f.handler.handle(command(), Timestamp::now()).await.unwrap();

        assert_eq!(result.agreement.status, AgreementStatus::PendingActivation);
        let creates: Vec<_> = f
            .gateway
            .calls()
            .into_iter()
            .filter(|c| c.method == "create_subscription")
            .collect();
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[0].idempotency_key, creates[1].idempotency_key);
    }

    #[tokio::test]
    async fn missing_customer_is_created_for_the_tenant() {
        let f = fixture();
        let mut cmd = command();
        cmd.customer_id = None;

        let result = f.handler.handle(cmd, Timestamp::now()).await.unwrap();

        assert_eq!(f.gateway.created_customers(), vec!["cus_mock_1".to_string()]);
        assert_eq!(
            result.agreement.subscription.unwrap().customer_id,
            "cus_mock_1"
        );
        let attach = f
            .gateway
            .calls()
            .into_iter()
            .find(|c| c.method == "attach_payment_method")
            .unwrap();
        assert_eq!(attach.target, "cus_mock_1:pm_1");
    }

    #[tokio::test]
    async fn deleted_customer_is_replaced() {
        let f = fixture();
        f.gateway.forget_customer("cus_1");

        let result = f.handler.handle(command(), Timestamp::now()).await.unwrap();

        assert_eq!(f.gateway.created_customers(), vec!["cus_mock_1".to_string()]);
        assert_eq!(f.gateway.create_requests()[0].customer_id, "cus_mock_1");
        assert_eq!(result.agreement.status, AgreementStatus::PendingActivation);
    }

    #[tokio::test]
    async fn retried_create_sends_the_same_billing_anchor() {
        let f = fixture();
        f.gateway
            .fail_next("create_subscription", GatewayError::network("reset"));
        f.gateway
            .fail_next("create_subscription", GatewayError::network("reset"));
        let now = Timestamp::from_unix_secs(1_772_323_199).unwrap();

        let result = f.handler.handle(command(), now).await.unwrap();

        let requests = f.gateway.create_requests();
        assert_eq!(requests.len(), 3);
        let expected = result.agreement.terms.next_anchor(now);
        assert!(requests.iter().all(|r| r.billing_anchor == expected));
    }

    #[tokio::test]
    async fn permanent_refusal_terminates_the_draft() {
        let f = fixture();
        f.gateway
            .fail_next("attach_payment_method", GatewayError::card_declined("declined"));

        let err = f.handler.handle(command(), Timestamp::now()).await.unwrap_err();

        assert!(matches!(err, BillingError::Gateway(_)));
        assert!(!f.gateway.was_called("create_subscription"));
        assert_eq!(f.ledger.write_count().await, 2);
    }

    #[tokio::test]
    async fn invalid_terms_are_rejected_before_any_write() {
        let f = fixture();
        let mut cmd = command();
        cmd.monthly_amount_minor = 0;

        let err = f.handler.handle(cmd, Timestamp::now()).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(f.ledger.write_count().await, 0);
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_payment_method_is_rejected() {
        let f = fixture();
        let mut cmd = command();
        cmd.payment_method_id = "  ".to_string();

        let err = f.handler.handle(cmd, Timestamp::now()).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }
}
