//! Mock subscription gateway for testing.
//!
//! Provides a configurable implementation of `SubscriptionGateway` for unit
//! and integration tests. Supports:
//! - Processor-style idempotency (same key, same subscription)
//! - Error injection per method, queued so N failures can precede a success
//! - Call tracking
//! - Holding `create_subscription` open to stage races with cancellation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::billing::SubscriptionRef;
use crate::domain::foundation::Timestamp;
use crate::ports::{
    CancelAck, CancelMode, CreateSubscriptionRequest, CustomerProfile, GatewayError,
    IdempotencyKey, SubscriptionGateway,
};

/// Mock subscription gateway.
///
/// # Example
///
/// ```ignore
/// let mock = MockSubscriptionGateway::new();
/// mock.fail_next("create_subscription", GatewayError::network("reset"));
/// let sub = mock.create_subscription(&request, &key).await?;
/// assert_eq!(mock.call_count("create_subscription"), 2);
/// ```
#[derive(Default, Clone)]
pub struct MockSubscriptionGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Customers created, keyed by idempotency key.
    customers: HashMap<String, String>,

    /// Stored customer ids the processor no longer knows.
    forgotten_customers: HashSet<String>,

    /// Subscriptions created, keyed by idempotency key.
    created: HashMap<String, SubscriptionRef>,

    /// Every create request received, including failed attempts.
    create_requests: Vec<CreateSubscriptionRequest>,

    /// Subscriptions canceled, with the mode used.
    canceled: Vec<(String, CancelMode)>,

    /// Queued errors by method name.
    method_errors: HashMap<String, VecDeque<GatewayError>>,

    /// Track method calls for assertions.
    call_log: Vec<GatewayCall>,

    /// When set, `create_subscription` waits on it before answering.
    create_gate: Option<Arc<Notify>>,

    next_customer: u64,
    next_subscription: u64,
}

/// Recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub method: String,
    pub idempotency_key: String,
    pub target: String,
}

impl MockSubscriptionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Queue an error for the next call to `method`.
    pub fn fail_next(&self, method: &str, error: GatewayError) {
        self.state()
            .method_errors
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make `ensure_customer` treat `customer_id` as deleted.
    pub fn forget_customer(&self, customer_id: &str) {
        self.state()
            .forgotten_customers
            .insert(customer_id.to_string());
    }

    /// Hold `create_subscription` until the returned handle is notified.
    pub fn hold_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state().create_gate = Some(gate.clone());
        gate
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertion Helpers
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state().call_log.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    /// Subscription ids canceled so far, in call order.
    pub fn canceled_subscriptions(&self) -> Vec<String> {
        self.state()
            .canceled
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn created_customers(&self) -> Vec<String> {
        self.state().customers.values().cloned().collect()
    }

    pub fn create_requests(&self) -> Vec<CreateSubscriptionRequest> {
        self.state().create_requests.clone()
    }

    pub fn created_subscriptions(&self) -> Vec<SubscriptionRef> {
        self.state().created.values().cloned().collect()
    }

    fn record(&self, method: &str, key: &IdempotencyKey, target: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.call_log.push(GatewayCall {
            method: method.to_string(),
            idempotency_key: key.to_string(),
            target: target.to_string(),
        });
        match state.method_errors.get_mut(method).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SubscriptionGateway for MockSubscriptionGateway {
    async fn ensure_customer(
        &self,
        existing_customer_id: Option<&str>,
        profile: &CustomerProfile,
        key: &IdempotencyKey,
    ) -> Result<String, GatewayError> {
        let target = existing_customer_id
            .map(str::to_string)
            .unwrap_or_else(|| profile.tenant_id.to_string());
        self.record("ensure_customer", key, &target)?;

        let mut state = self.state();
        if let Some(customer_id) = existing_customer_id {
            if !state.forgotten_customers.contains(customer_id) {
                return Ok(customer_id.to_string());
            }
        }
        if let Some(existing) = state.customers.get(key.as_str()) {
            return Ok(existing.clone());
        }

        state.next_customer += 1;
        let customer_id = format!("cus_mock_{}", state.next_customer);
        state.customers.insert(key.to_string(), customer_id.clone());
        Ok(customer_id)
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> Result<(), GatewayError> {
        self.record(
            "attach_payment_method",
            key,
            &format!("{}:{}", customer_id, payment_method_id),
        )
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
        key: &IdempotencyKey,
    ) -> Result<SubscriptionRef, GatewayError> {
        self.state().create_requests.push(request.clone());
        self.record("create_subscription", key, &request.customer_id)?;

        let gate = self.state().create_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state();
        if let Some(existing) = state.created.get(key.as_str()) {
            return Ok(existing.clone());
        }

        state.next_subscription += 1;
        let subscription = SubscriptionRef {
            subscription_id: format!("sub_mock_{}", state.next_subscription),
            customer_id: request.customer_id.clone(),
            attached_at: Timestamp::now(),
        };
        state
            .created
            .insert(key.to_string(), subscription.clone());
        Ok(subscription)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        mode: CancelMode,
        key: &IdempotencyKey,
    ) -> Result<CancelAck, GatewayError> {
        self.record("cancel_subscription", key, subscription_id)?;

        let mut state = self.state();
        if !state
            .canceled
            .iter()
            .any(|(id, m)| id == subscription_id && *m == mode)
        {
            state.canceled.push((subscription_id.to_string(), mode));
        }

        Ok(CancelAck {
            subscription_id: subscription_id.to_string(),
            status: match mode {
                CancelMode::Immediately => "canceled".to_string(),
                CancelMode::AtPeriodEnd => "active".to_string(),
            },
            cancel_at_period_end: mode == CancelMode::AtPeriodEnd,
        })
    }
}
