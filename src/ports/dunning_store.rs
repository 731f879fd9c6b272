//! DunningTaskStore port - pending follow-ups for past-due agreements.

use async_trait::async_trait;

use crate::domain::billing::DunningTask;
use crate::domain::foundation::{AgreementId, DomainError, Timestamp};

/// Port for dunning task persistence. At most one task per agreement.
#[async_trait]
pub trait DunningTaskStore: Send + Sync {
    /// Insert or replace the task for its agreement.
    async fn upsert(&self, task: &DunningTask) -> Result<(), DomainError>;

    async fn get(&self, agreement_id: AgreementId) -> Result<Option<DunningTask>, DomainError>;

    /// Returns true if a task existed.
    async fn remove(&self, agreement_id: AgreementId) -> Result<bool, DomainError>;

    /// Tasks with `next_check_at <= now`, oldest first.
    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<DunningTask>, DomainError>;
}
