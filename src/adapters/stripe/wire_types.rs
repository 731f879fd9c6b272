//! Stripe REST response types.
//!
//! Only the fields the gateway reads are modelled; serde ignores the rest.

use serde::Deserialize;

/// Stripe price object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Unix seconds.
    pub created: Option<i64>,
}

/// Stripe customer object. A deleted customer comes back as a stub with
/// `deleted: true`.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Stripe payment method object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentMethod {
    pub id: String,
    pub customer: Option<String>,
}

/// Envelope Stripe returns on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

impl StripeErrorBody {
    /// Most specific provider code available.
    pub fn provider_code(&self) -> Option<&str> {
        self.decline_code
            .as_deref()
            .or(self.code.as_deref())
            .or(self.error_type.as_deref())
    }
}
