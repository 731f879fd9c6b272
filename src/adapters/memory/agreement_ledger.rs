//! In-memory agreement ledger.
//!
//! Suitable for tests and single-node development. The whole ledger sits
//! behind one `RwLock`, so a compare-and-swap and its payment append are
//! trivially atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::billing::{Agreement, Payment, PaymentKey};
use crate::domain::foundation::{AgreementId, DomainError, ErrorCode};
use crate::ports::{AgreementLedger, CasOutcome};

#[derive(Default)]
struct LedgerState {
    agreements: HashMap<AgreementId, Agreement>,
    payments: HashMap<AgreementId, Vec<Payment>>,
    writes: u64,
}

/// In-memory implementation of the AgreementLedger port.
#[derive(Default)]
pub struct InMemoryAgreementLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryAgreementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Number of committed writes (inserts and swaps).
    pub async fn write_count(&self) -> u64 {
        self.state.read().await.writes
    }

    /// Total payment records across all agreements.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl AgreementLedger for InMemoryAgreementLedger {
    async fn insert(&self, agreement: &Agreement) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if state.agreements.contains_key(&agreement.id) {
            return Err(DomainError::new(
                ErrorCode::AlreadyExists,
                format!("Agreement {} already exists", agreement.id),
            ));
        }
        state.agreements.insert(agreement.id, agreement.clone());
        state.writes += 1;
        Ok(())
    }

    async fn get(&self, id: AgreementId) -> Result<Option<Agreement>, DomainError> {
        Ok(self.state.read().await.agreements.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &Agreement,
        payment: Option<&Payment>,
    ) -> Result<CasOutcome, DomainError> {
        if next.version != expected_version + 1 {
            return Err(DomainError::validation(
                "version",
                format!(
                    "next version {} does not follow expected version {}",
                    next.version, expected_version
                ),
            ));
        }

        let mut state = self.state.write().await;
        let stored_version = state
            .agreements
            .get(&next.id)
            .map(|a| a.version)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::AgreementNotFound,
                    format!("Agreement {} not found", next.id),
                )
            })?;

        if stored_version != expected_version {
            return Ok(CasOutcome::Conflict);
        }

        let mut payment_inserted = false;
        if let Some(payment) = payment {
            let history = state.payments.entry(next.id).or_default();
            let key = payment.key();
            if !history.iter().any(|p| p.key() == key) {
                history.push(payment.clone());
                payment_inserted = true;
            }
        }

        state.agreements.insert(next.id, next.clone());
        state.writes += 1;
        Ok(CasOutcome::Committed { payment_inserted })
    }

    async fn find_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Agreement>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .agreements
            .values()
            .find(|a| {
                a.subscription
                    .iter()
                    .chain(a.subscription_history.iter())
                    .any(|s| s.subscription_id == subscription_id)
            })
            .cloned())
    }

    async fn payments(&self, id: AgreementId) -> Result<Vec<Payment>, DomainError> {
        let state = self.state.read().await;
        let mut payments = state.payments.get(&id).cloned().unwrap_or_default();
        payments.sort_by(|a, b| {
            a.provider_created_at
                .cmp(&b.provider_created_at)
                .then_with(|| a.invoice_id.cmp(&b.invoice_id))
        });
        Ok(payments)
    }

    async fn has_payment(&self, id: AgreementId, key: &PaymentKey) -> Result<bool, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .get(&id)
            .is_some_and(|history| history.iter().any(|p| &p.key() == key)))
    }
}
