//! Errors surfaced by the billing application layer.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | Verification | 400 |
//! | Validation | 400 |
//! | NotFound | 404 |
//! | InvalidTransition | 409 |
//! | Gateway | 502 |
//! | TransientGateway | 503 |
//! | NotReady | 503 |
//! | LedgerConflict | 500 |
//! | Storage | 500 |

use thiserror::Error;

use crate::domain::billing::WebhookError;
use crate::domain::foundation::{AgreementId, DomainError, ErrorCode, ValidationError};
use crate::ports::GatewayError;

/// Billing operation errors.
#[derive(Debug, Clone, Error)]
pub enum BillingError {
    #[error("webhook rejected: {0}")]
    Verification(#[from] WebhookError),

    #[error("payment processor unavailable: {0}")]
    TransientGateway(GatewayError),

    #[error("payment processor refused the request: {0}")]
    Gateway(GatewayError),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("agreement {agreement_id} still conflicting after {attempts} attempts")]
    LedgerConflict {
        agreement_id: AgreementId,
        attempts: u32,
    },

    #[error("agreement {0} not ready: {1}")]
    NotReady(AgreementId, String),

    #[error("agreement {0} not found")]
    NotFound(AgreementId),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(DomainError),
}

impl BillingError {
    /// Whether the caller (or the processor) should retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::TransientGateway(_)
                | BillingError::NotReady(..)
                | BillingError::LedgerConflict { .. }
                | BillingError::Storage(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::Verification(_) | BillingError::Validation(_) => {
                ErrorCode::ValidationFailed
            }
            BillingError::NotFound(_) => ErrorCode::AgreementNotFound,
            BillingError::InvalidTransition(_) => ErrorCode::InvalidStateTransition,
            BillingError::LedgerConflict { .. } => ErrorCode::VersionConflict,
            BillingError::Storage(_) => ErrorCode::DatabaseError,
            BillingError::TransientGateway(_)
            | BillingError::Gateway(_)
            | BillingError::NotReady(..) => ErrorCode::InternalError,
        }
    }
}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        if err.retryable {
            BillingError::TransientGateway(err)
        } else {
            BillingError::Gateway(err)
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::InvalidStateTransition => BillingError::InvalidTransition(err.message),
            _ => BillingError::Storage(err),
        }
    }
}
