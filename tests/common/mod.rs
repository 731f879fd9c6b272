//! Shared harness for the integration tests.
//!
//! Wires the reconciliation stack over in-memory stores, a mock gateway and
//! a recording notification sink, the same way `startup` wires production.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::watch;

use rent_billing::adapters::http::{billing_router, BillingAppState};
use rent_billing::adapters::memory::{
    InMemoryAgreementLedger, InMemoryDunningStore, InMemoryEventDeduplicator,
};
use rent_billing::adapters::notifications::RecordingNotificationSink;
use rent_billing::adapters::stripe::MockSubscriptionGateway;
use rent_billing::application::{
    notification_channel, BillingError, CreateAgreementCommand, DunningScheduler,
    HandleProcessorWebhookCommand, NotificationDispatcher, ReconciliationEngine, RetryPolicy,
    WebhookDisposition,
};
use rent_billing::domain::billing::{
    sign_payload, Agreement, DunningPolicy, ReconcilePolicy, StripeWebhookVerifier,
};
use rent_billing::domain::foundation::{AgreementId, PropertyId, TenantId, Timestamp};
use rent_billing::ports::{AgreementLedger, Notification};

pub const SECRET: &str = "whsec_integration";
pub const DAY: i64 = 86_400;

pub struct Harness {
    pub ledger: Arc<InMemoryAgreementLedger>,
    pub dedup: Arc<InMemoryEventDeduplicator>,
    pub dunning: Arc<InMemoryDunningStore>,
    pub gateway: MockSubscriptionGateway,
    pub sink: Arc<RecordingNotificationSink>,
    pub engine: Arc<ReconciliationEngine>,
    pub scheduler: Arc<DunningScheduler>,
    pub state: BillingAppState,
    dispatcher: Option<NotificationDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_grace_days(7)
    }

    pub fn with_grace_days(days: i64) -> Self {
        let ledger = Arc::new(InMemoryAgreementLedger::new());
        let dedup = Arc::new(InMemoryEventDeduplicator::default());
        let dunning = Arc::new(InMemoryDunningStore::new());
        let gateway = MockSubscriptionGateway::new();
        let sink = Arc::new(RecordingNotificationSink::new());

        let (queue, dispatcher) = notification_channel(256, sink.clone());
        let scheduler = Arc::new(DunningScheduler::new(
            dunning.clone(),
            queue.clone(),
            DunningPolicy::default(),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            scheduler.clone(),
            queue,
            ReconcilePolicy {
                grace_window: chrono::Duration::days(days),
            },
        ));

        let state = BillingAppState {
            engine: engine.clone(),
            gateway: Arc::new(gateway.clone()),
            deduplicator: dedup.clone(),
            verifier: StripeWebhookVerifier::new(SecretString::new(SECRET.to_string())),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        };

        Self {
            ledger,
            dedup,
            dunning,
            gateway,
            sink,
            engine,
            scheduler,
            state,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn router(&self) -> Router {
        billing_router().with_state(self.state.clone())
    }

    /// Creates an agreement through the gateway; returns it with its subscription id.
    pub async fn pending_agreement(&self, now: Timestamp) -> (AgreementId, String) {
        let result = self
            .state
            .create_agreement_handler()
            .handle(create_command(), now)
            .await
            .expect("agreement creation");
        let subscription_id = result
            .agreement
            .subscription
            .as_ref()
            .expect("subscription bound")
            .subscription_id
            .clone();
        (result.agreement.id, subscription_id)
    }

    pub async fn agreement(&self, id: AgreementId) -> Agreement {
        self.ledger.get(id).await.unwrap().expect("agreement exists")
    }

    /// Delivers a signed webhook through the application handler.
    pub async fn deliver(
        &self,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> Result<WebhookDisposition, BillingError> {
        self.state
            .webhook_handler()
            .handle(signed(payload, now), now)
            .await
    }

    /// Stops the dispatcher after it drains the queue, then returns what was delivered.
    pub async fn flush_notifications(&mut self) -> Vec<Notification> {
        if let Some(dispatcher) = self.dispatcher.take() {
            let (tx, rx) = watch::channel(false);
            tx.send(true).unwrap();
            dispatcher.run(rx).await;
        }
        self.sink.notifications()
    }
}

pub fn at(secs: i64) -> Timestamp {
    Timestamp::from_unix_secs(secs).unwrap()
}

pub fn create_command() -> CreateAgreementCommand {
    CreateAgreementCommand {
        tenant_id: TenantId::new(),
        property_id: PropertyId::new(),
        customer_id: Some("cus_tenant".to_string()),
        tenant_email: Some("tenant@example.com".to_string()),
        tenant_name: Some("Test Tenant".to_string()),
        payment_method_id: "pm_card".to_string(),
        monthly_amount_minor: 180_000,
        currency: "usd".to_string(),
        billing_anchor_day: 1,
    }
}

pub fn signature_header(payload: &[u8], timestamp: i64) -> String {
    format!("t={},v1={}", timestamp, sign_payload(SECRET, timestamp, payload))
}

pub fn signed(payload: Vec<u8>, now: Timestamp) -> HandleProcessorWebhookCommand {
    let signature = signature_header(&payload, now.as_unix_secs());
    HandleProcessorWebhookCommand {
        payload,
        signature: Some(signature),
    }
}

/// Invoice webhook body in the processor's envelope format.
pub fn invoice_event(
    event_id: &str,
    event_type: &str,
    agreement_id: AgreementId,
    subscription_id: &str,
    invoice_id: &str,
    created: Timestamp,
) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": event_type,
        "created": created.as_unix_secs(),
        "livemode": false,
        "data": {"object": {
            "id": invoice_id,
            "object": "invoice",
            "customer": "cus_tenant",
            "subscription": subscription_id,
            "amount_paid": 180000,
            "amount_due": 180000,
            "currency": "usd",
            "created": created.as_unix_secs(),
            "subscription_details": {"metadata": {"agreement_id": agreement_id.to_string()}}
        }}
    })
    .to_string()
    .into_bytes()
}

/// Subscription lifecycle webhook body.
pub fn subscription_event(
    event_id: &str,
    event_type: &str,
    agreement_id: AgreementId,
    subscription_id: &str,
    created: Timestamp,
) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": event_type,
        "created": created.as_unix_secs(),
        "livemode": false,
        "data": {"object": {
            "id": subscription_id,
            "object": "subscription",
            "customer": "cus_tenant",
            "status": "canceled",
            "canceled_at": created.as_unix_secs(),
            "metadata": {"agreement_id": agreement_id.to_string()}
        }}
    })
    .to_string()
    .into_bytes()
}
