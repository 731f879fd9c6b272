//! AgreementLedger port - authoritative store of agreements and payments.
//!
//! Writes go through optimistic compare-and-swap: the caller states the
//! version it read, and the agreement write plus the optional payment
//! append commit together or not at all.

use async_trait::async_trait;

use crate::domain::billing::{Agreement, Payment, PaymentKey};
use crate::domain::foundation::{AgreementId, DomainError};

/// Result of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write committed.
    Committed {
        /// False if the payment key already existed and the append was skipped.
        payment_inserted: bool,
    },
    /// The stored version differed from the expected one.
    Conflict,
}

/// Port for agreement and payment persistence.
#[async_trait]
pub trait AgreementLedger: Send + Sync {
    /// Store a new agreement.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the id is taken.
    async fn insert(&self, agreement: &Agreement) -> Result<(), DomainError>;

    /// Load an agreement by id.
    async fn get(&self, id: AgreementId) -> Result<Option<Agreement>, DomainError>;

    /// Replace the agreement if its stored version equals `expected_version`.
    ///
    /// `next.version` must be `expected_version + 1`. The payment, when
    /// present, is appended in the same transaction and skipped if its
    /// `(invoice_id, outcome)` key is already recorded.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &Agreement,
        payment: Option<&Payment>,
    ) -> Result<CasOutcome, DomainError>;

    /// Find the agreement owning a processor subscription, current or historical.
    async fn find_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Agreement>, DomainError>;

    /// Payment history, ordered by provider creation time.
    async fn payments(&self, id: AgreementId) -> Result<Vec<Payment>, DomainError>;

    /// Whether a payment with this key is already recorded for the agreement.
    async fn has_payment(&self, id: AgreementId, key: &PaymentKey) -> Result<bool, DomainError>;
}
