//! Payment records and invoice ordering.
//!
//! Payments are append-only facts about one billing cycle. The ledger keys
//! them by `(invoice_id, outcome)` so repeated deliveries of the same invoice
//! outcome collapse into a single record.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{AgreementId, Timestamp, ValidationError};

/// Outcome of one invoice collection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Customer action (e.g. 3-D Secure) is needed before the charge completes.
    Pending,
    Failed,
    Succeeded,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Pending => "pending",
            PaymentOutcome::Failed => "failed",
            PaymentOutcome::Succeeded => "succeeded",
        }
    }

    /// Tie-break rank for invoices created at the same instant.
    ///
    /// A retried invoice that finally succeeds is newer than its failure.
    fn rank(&self) -> u8 {
        match self {
            PaymentOutcome::Pending => 0,
            PaymentOutcome::Failed => 1,
            PaymentOutcome::Succeeded => 2,
        }
    }
}

impl fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentOutcome::Pending),
            "failed" => Ok(PaymentOutcome::Failed),
            "succeeded" => Ok(PaymentOutcome::Succeeded),
            other => Err(ValidationError::invalid_format(
                "outcome",
                format!("unknown payment outcome '{}'", other),
            )),
        }
    }
}

/// Idempotency key of a payment record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentKey {
    pub invoice_id: String,
    pub outcome: PaymentOutcome,
}

/// Immutable record of one billing cycle outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub agreement_id: AgreementId,
    pub invoice_id: String,
    /// Minor currency units (cents).
    pub amount_minor: i64,
    pub currency: String,
    pub outcome: PaymentOutcome,
    pub failure_reason: Option<String>,
    /// Invoice creation time reported by the processor.
    pub provider_created_at: Timestamp,
    pub recorded_at: Timestamp,
}

impl Payment {
    pub fn key(&self) -> PaymentKey {
        PaymentKey {
            invoice_id: self.invoice_id.clone(),
            outcome: self.outcome,
        }
    }
}

/// The newest invoice an agreement has observed.
///
/// Invoices are ordered by provider creation time, then outcome rank,
/// then invoice id, never by arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceMarker {
    pub invoice_id: String,
    pub created_at: Timestamp,
    pub outcome: PaymentOutcome,
}

impl InvoiceMarker {
    pub fn new(invoice_id: impl Into<String>, created_at: Timestamp, outcome: PaymentOutcome) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            created_at,
            outcome,
        }
    }

    /// Returns true if `self` strictly supersedes `other`.
    pub fn is_newer_than(&self, other: &InvoiceMarker) -> bool {
        self.cmp_order(other) == Ordering::Greater
    }

    fn cmp_order(&self, other: &InvoiceMarker) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.outcome.rank().cmp(&other.outcome.rank()))
            .then_with(|| self.invoice_id.cmp(&other.invoice_id))
    }
}
