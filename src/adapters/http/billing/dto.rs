//! HTTP DTOs (Data Transfer Objects) for billing endpoints.
//!
//! These types define the JSON request/response structure for the billing API.
//! They serve as the boundary between HTTP and the application layer.

use serde::{Deserialize, Serialize};

use crate::application::WebhookDisposition;
use crate::domain::billing::{Agreement, AgreementStatus, Payment, PaymentOutcome};
use crate::domain::foundation::{AgreementId, PropertyId, TenantId, Timestamp};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to create an agreement and its remote subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgreementRequest {
    pub tenant_id: TenantId,
    pub property_id: PropertyId,
    /// Stored processor customer; a new one is created when absent.
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub tenant_email: Option<String>,
    #[serde(default)]
    pub tenant_name: Option<String>,
    pub payment_method_id: String,
    pub monthly_amount_minor: i64,
    pub currency: String,
    pub billing_anchor_day: u8,
}

/// Request to cancel an agreement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAgreementRequest {
    /// Let the current period run out instead of cancelling now.
    #[serde(default)]
    pub at_period_end: bool,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Agreement as exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct AgreementResponse {
    pub id: AgreementId,
    pub tenant_id: TenantId,
    pub property_id: PropertyId,
    pub status: AgreementStatus,
    pub monthly_amount_minor: i64,
    pub currency: String,
    pub billing_anchor_day: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_invoice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_deadline: Option<Timestamp>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<Timestamp>,
}

impl From<Agreement> for AgreementResponse {
    fn from(agreement: Agreement) -> Self {
        Self {
            id: agreement.id,
            tenant_id: agreement.tenant_id,
            property_id: agreement.property_id,
            status: agreement.status,
            monthly_amount_minor: agreement.terms.monthly_amount_minor,
            currency: agreement.terms.currency,
            billing_anchor_day: agreement.terms.billing_anchor_day,
            subscription_id: agreement.subscription.map(|s| s.subscription_id),
            latest_invoice_id: agreement.latest_invoice.map(|i| i.invoice_id),
            grace_deadline: agreement.grace_deadline,
            version: agreement.version,
            created_at: agreement.created_at,
            updated_at: agreement.updated_at,
            terminated_at: agreement.terminated_at,
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelAgreementResponse {
    pub agreement: AgreementResponse,
    /// Remote subscription status reported by the processor, if it was called.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<String>,
    pub cancel_at_period_end: bool,
}

/// One payment record.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub invoice_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub outcome: PaymentOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub provider_created_at: Timestamp,
    pub recorded_at: Timestamp,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            invoice_id: payment.invoice_id,
            amount_minor: payment.amount_minor,
            currency: payment.currency,
            outcome: payment.outcome,
            failure_reason: payment.failure_reason,
            provider_created_at: payment.provider_created_at,
            recorded_at: payment.recorded_at,
        }
    }
}

/// Payment history of an agreement.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentListResponse {
    pub agreement_id: AgreementId,
    pub payments: Vec<PaymentResponse>,
}

/// Acknowledgement body returned to the processor.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub event_id: String,
    /// `applied`, `ignored`, `duplicate` or `in_flight`.
    pub disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&WebhookDisposition> for WebhookResponse {
    fn from(disposition: &WebhookDisposition) -> Self {
        let (label, detail) = match disposition {
            WebhookDisposition::Applied { outcome, .. } => ("applied", Some(format!("{:?}", outcome))),
            WebhookDisposition::Ignored { reason, .. } => ("ignored", Some(reason.clone())),
            WebhookDisposition::Duplicate { outcome, .. } => ("duplicate", Some(outcome.to_string())),
            WebhookDisposition::InFlight { .. } => ("in_flight", None),
        };
        Self {
            event_id: disposition.event_id().to_string(),
            disposition: label,
            detail,
        }
    }
}

/// Liveness check body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Response DTO
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response for API errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether the same request may succeed later.
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::BillingTerms;
    use crate::ports::EventOutcome;

    #[test]
    fn cancel_request_defaults_to_immediate() {
        let request: CancelAgreementRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.at_period_end);
    }

    #[test]
    fn create_request_deserializes() {
        let json = format!(
            r#"{{
                "tenant_id": "{}",
                "property_id": "{}",
                "customer_id": "cus_1",
                "payment_method_id": "pm_1",
                "monthly_amount_minor": 150000,
                "currency": "usd",
                "billing_anchor_day": 5
            }}"#,
            TenantId::new(),
            PropertyId::new()
        );
        let request: CreateAgreementRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.billing_anchor_day, 5);
        assert_eq!(request.monthly_amount_minor, 150_000);
        assert_eq!(request.customer_id.as_deref(), Some("cus_1"));
        assert!(request.tenant_email.is_none());
    }

    #[test]
    fn create_request_without_customer_deserializes() {
        let json = format!(
            r#"{{
                "tenant_id": "{}",
                "property_id": "{}",
                "tenant_email": "tenant@example.com",
                "payment_method_id": "pm_1",
                "monthly_amount_minor": 150000,
                "currency": "usd",
                "billing_anchor_day": 5
            }}"#,
            TenantId::new(),
            PropertyId::new()
        );
        let request: CreateAgreementRequest = serde_json::from_str(&json).unwrap();
        assert!(request.customer_id.is_none());
        assert_eq!(request.tenant_email.as_deref(), Some("tenant@example.com"));
    }

    #[test]
    fn draft_view_omits_subscription() {
        let agreement = Agreement::draft(
            AgreementId::new(),
            TenantId::new(),
            PropertyId::new(),
            BillingTerms::new(100_000, "usd", 1).unwrap(),
            Timestamp::now(),
        );

        let json = serde_json::to_value(AgreementResponse::from(agreement)).unwrap();

        assert_eq!(json["status"], "DRAFT");
        assert!(json.get("subscription_id").is_none());
        assert_eq!(json["version"], 1);
    }

    #[test]
    fn duplicate_disposition_reports_first_outcome() {
        let response = WebhookResponse::from(&WebhookDisposition::Duplicate {
            event_id: "evt_1".to_string(),
            outcome: EventOutcome::Ignored,
        });
        assert_eq!(response.disposition, "duplicate");
        assert_eq!(response.detail.as_deref(), Some("ignored"));
    }
}
