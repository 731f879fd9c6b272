//! SubscriptionGateway port - thin call boundary to the payment processor.
//!
//! Every call carries a client-generated idempotency key so a retried call
//! never creates a second subscription or a second cancellation.

use async_trait::async_trait;
use std::fmt;

use crate::domain::billing::SubscriptionRef;
use crate::domain::foundation::{AgreementId, TenantId, Timestamp};

/// Port for remote subscription operations.
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Resolve the processor customer for a tenant.
    ///
    /// A stored `existing_customer_id` is returned if the processor still
    /// knows it. Otherwise (none given, deleted, or unknown) a customer is
    /// created from `profile` under `key`.
    async fn ensure_customer(
        &self,
        existing_customer_id: Option<&str>,
        profile: &CustomerProfile,
        key: &IdempotencyKey,
    ) -> Result<String, GatewayError>;

    /// Attach a payment method to a customer and make it the default.
    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> Result<(), GatewayError>;

    /// Create a monthly subscription for an agreement.
    ///
    /// The agreement id travels in the subscription metadata so webhooks
    /// can be routed back to it.
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
        key: &IdempotencyKey,
    ) -> Result<SubscriptionRef, GatewayError>;

    /// Cancel a subscription now or at the end of the current period.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        mode: CancelMode,
        key: &IdempotencyKey,
    ) -> Result<CancelAck, GatewayError>;
}

/// Operations that need an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    CreateCustomer,
    AttachPaymentMethod,
    CreateSubscription,
    CancelSubscription,
    CancelAtPeriodEnd,
    /// Cancels a subscription created for an agreement that was
    /// terminated while the create call was in flight.
    CancelOrphan,
}

impl GatewayOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOperation::CreateCustomer => "create-customer",
            GatewayOperation::AttachPaymentMethod => "attach-payment-method",
            GatewayOperation::CreateSubscription => "create-subscription",
            GatewayOperation::CancelSubscription => "cancel-subscription",
            GatewayOperation::CancelAtPeriodEnd => "cancel-at-period-end",
            GatewayOperation::CancelOrphan => "cancel-orphan",
        }
    }
}

/// Client-generated idempotency key, stable across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for `operation` on `agreement_id`.
    pub fn derive(agreement_id: AgreementId, operation: GatewayOperation) -> Self {
        Self(format!("{}:{}", agreement_id, operation.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant details sent when a processor customer is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerProfile {
    pub tenant_id: TenantId,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Request to create a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    pub agreement_id: AgreementId,
    pub customer_id: String,
    pub payment_method_id: String,
    /// Monthly amount in minor units.
    pub amount_minor: i64,
    pub currency: String,
    /// Start of the first billing cycle. Fixed once per agreement so
    /// every retry under the same key sends identical parameters.
    pub billing_anchor: Timestamp,
}

/// When a cancellation takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    Immediately,
    AtPeriodEnd,
}

/// Processor acknowledgement of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAck {
    pub subscription_id: String,
    /// Processor-side status after the call (e.g. "canceled", "active").
    pub status: String,
    pub cancel_at_period_end: bool,
}

/// Gateway error with retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    /// Error code for categorization.
    pub code: GatewayErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Provider's error code (if available).
    pub provider_code: Option<String>,

    /// Whether the operation can be retried with the same key.
    pub retryable: bool,
}

impl GatewayError {
    /// Create a new gateway error.
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    /// Create with provider code.
    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::NetworkError, message)
    }

    /// Create a card declined error.
    pub fn card_declined(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::CardDeclined, message)
    }

    /// Create a not found error.
    pub fn not_found(resource: &str) -> Self {
        Self::new(GatewayErrorCode::NotFound, format!("{} not found", resource))
    }

    /// Classifies an HTTP status returned by the processor.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            401 | 403 => GatewayErrorCode::AuthenticationError,
            402 => GatewayErrorCode::CardDeclined,
            404 => GatewayErrorCode::NotFound,
            409 => GatewayErrorCode::IdempotencyConflict,
            429 => GatewayErrorCode::RateLimitExceeded,
            500..=599 => GatewayErrorCode::ProviderUnavailable,
            _ => GatewayErrorCode::InvalidRequest,
        };
        Self::new(code, message)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

/// Gateway error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorCode {
    NetworkError,
    ProviderUnavailable,
    RateLimitExceeded,
    AuthenticationError,
    CardDeclined,
    InvalidRequest,
    IdempotencyConflict,
    NotFound,
}

impl GatewayErrorCode {
    /// Transient failures worth retrying with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayErrorCode::NetworkError
                | GatewayErrorCode::ProviderUnavailable
                | GatewayErrorCode::RateLimitExceeded
        )
    }
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayErrorCode::NetworkError => "network_error",
            GatewayErrorCode::ProviderUnavailable => "provider_unavailable",
            GatewayErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            GatewayErrorCode::AuthenticationError => "authentication_error",
            GatewayErrorCode::CardDeclined => "card_declined",
            GatewayErrorCode::InvalidRequest => "invalid_request",
            GatewayErrorCode::IdempotencyConflict => "idempotency_conflict",
            GatewayErrorCode::NotFound => "not_found",
        };
        write!(f, "{}", s)
    }
}
