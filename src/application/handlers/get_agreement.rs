//! GetAgreementHandler - Query handler for agreements and their payments.

use std::sync::Arc;

use crate::application::errors::BillingError;
use crate::domain::billing::{Agreement, Payment};
use crate::domain::foundation::AgreementId;
use crate::ports::AgreementLedger;

/// Query for one agreement.
#[derive(Debug, Clone)]
pub struct GetAgreementQuery {
    pub agreement_id: AgreementId,
}

/// Handler for reading agreements.
///
/// Reads go straight to the ledger without taking the agreement lock,
/// so a result may trail an in-flight reconciliation by one version.
pub struct GetAgreementHandler {
    ledger: Arc<dyn AgreementLedger>,
}

impl GetAgreementHandler {
    pub fn new(ledger: Arc<dyn AgreementLedger>) -> Self {
        Self { ledger }
    }

    pub async fn handle(&self, query: GetAgreementQuery) -> Result<Agreement, BillingError> {
        self.ledger
            .get(query.agreement_id)
            .await?
            .ok_or(BillingError::NotFound(query.agreement_id))
    }

    /// Payment history ordered by processor creation time.
    pub async fn payments(&self, query: GetAgreementQuery) -> Result<Vec<Payment>, BillingError> {
        if self.ledger.get(query.agreement_id).await?.is_none() {
            return Err(BillingError::NotFound(query.agreement_id));
        }
        Ok(self.ledger.payments(query.agreement_id).await?)
    }
}
