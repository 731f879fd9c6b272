//! In-memory event deduplicator.
//!
//! Holds processed-event records in a map guarded by a single mutex, so
//! `admit` is a check-and-insert under one lock.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::ports::{Admission, EventDeduplicator, EventOutcome, ProcessedEvent};

/// In-memory implementation of the EventDeduplicator port.
pub struct InMemoryEventDeduplicator {
    records: Mutex<HashMap<String, ProcessedEvent>>,
    claim_timeout: Duration,
}

impl Default for InMemoryEventDeduplicator {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl InMemoryEventDeduplicator {
    pub fn new(claim_timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            claim_timeout,
        }
    }

    /// Number of stored records, claimed or completed.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl EventDeduplicator for InMemoryEventDeduplicator {
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> Result<Admission, DomainError> {
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(event_id) {
            if let Some(outcome) = existing.outcome {
                return Ok(Admission::Duplicate(outcome));
            }
            if now.is_before(&existing.claimed_at.plus(self.claim_timeout)) {
                return Ok(Admission::InFlight);
            }
            tracing::warn!(
                event_id = %event_id,
                claimed_at = %existing.claimed_at,
                "Reclaiming stale event claim"
            );
        }

        records.insert(
            event_id.to_string(),
            ProcessedEvent::claim(event_id, event_type, now),
        );
        Ok(Admission::Fresh)
    }

    async fn complete(
        &self,
        event_id: &str,
        outcome: EventOutcome,
        detail: Option<&str>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(event_id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::NotFound,
                format!("No claim held for event {}", event_id),
            )
        })?;

        record.outcome = Some(outcome);
        record.detail = detail.map(str::to_string);
        record.completed_at = Some(now);
        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<(), DomainError> {
        let mut records = self.records.lock().await;
        if records.get(event_id).is_some_and(|r| !r.is_completed()) {
            records.remove(event_id);
        }
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedEvent>, DomainError> {
        Ok(self.records.lock().await.get(event_id).cloned())
    }

    async fn purge_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| !r.claimed_at.is_before(&cutoff));
        Ok((before - records.len()) as u64)
    }
}
