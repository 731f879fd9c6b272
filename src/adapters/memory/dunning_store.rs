//! In-memory dunning task store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::billing::DunningTask;
use crate::domain::foundation::{AgreementId, DomainError, Timestamp};
use crate::ports::DunningTaskStore;

/// In-memory implementation of the DunningTaskStore port.
#[derive(Default)]
pub struct InMemoryDunningStore {
    tasks: RwLock<HashMap<AgreementId, DunningTask>>,
}

impl InMemoryDunningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl DunningTaskStore for InMemoryDunningStore {
    async fn upsert(&self, task: &DunningTask) -> Result<(), DomainError> {
        self.tasks
            .write()
            .await
            .insert(task.agreement_id, task.clone());
        Ok(())
    }

    async fn get(&self, agreement_id: AgreementId) -> Result<Option<DunningTask>, DomainError> {
        Ok(self.tasks.read().await.get(&agreement_id).cloned())
    }

    async fn remove(&self, agreement_id: AgreementId) -> Result<bool, DomainError> {
        Ok(self.tasks.write().await.remove(&agreement_id).is_some())
    }

    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<DunningTask>, DomainError> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<DunningTask> = tasks.values().filter(|t| t.is_due(now)).cloned().collect();
        due.sort_by_key(|t| t.next_check_at);
        due.truncate(limit);
        Ok(due)
    }
}
