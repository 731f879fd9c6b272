//! Per-agreement serialization within one process.
//!
//! The ledger's compare-and-swap is what keeps agreements consistent across
//! processes; this lock only stops writers in the same process from
//! burning retries against each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::foundation::AgreementId;

const PRUNE_THRESHOLD: usize = 1024;

/// Map of agreement id to async mutex.
#[derive(Default)]
pub struct AgreementLocks {
    locks: Mutex<HashMap<AgreementId, Arc<AsyncMutex<()>>>>,
}

impl AgreementLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `agreement_id`.
    pub async fn acquire(&self, agreement_id: AgreementId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(agreement_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked agreements.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
