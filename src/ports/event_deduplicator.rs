//! EventDeduplicator port - at-most-once application of processor events.
//!
//! The processor delivers webhooks at least once: after timeouts, after a
//! 5xx from this service, or when our 200 is lost. Admission is an atomic
//! claim on the event id. The claimant completes it after applying, or
//! releases it on a retryable failure so the next delivery can try again.
//! Claims left behind by a crashed worker expire after the claim timeout.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{DomainError, Timestamp, ValidationError};

/// Final outcome recorded for a processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOutcome {
    Applied,
    Ignored,
    Failed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Ignored => "ignored",
            EventOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(EventOutcome::Applied),
            "ignored" => Ok(EventOutcome::Ignored),
            "failed" => Ok(EventOutcome::Failed),
            other => Err(ValidationError::invalid_format(
                "outcome",
                format!("unknown event outcome '{}'", other),
            )),
        }
    }
}

/// Record of a processor event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    /// `None` while the claim is held.
    pub outcome: Option<EventOutcome>,
    pub detail: Option<String>,
    pub claimed_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl ProcessedEvent {
    pub fn claim(event_id: impl Into<String>, event_type: impl Into<String>, now: Timestamp) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            outcome: None,
            detail: None,
            claimed_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Result of trying to claim an event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The caller owns the claim and must complete or release it.
    Fresh,
    /// Already completed; skip every side effect.
    Duplicate(EventOutcome),
    /// Another worker holds a live claim.
    InFlight,
}

/// Port for event deduplication.
///
/// Implementations must make `admit` atomic with respect to concurrent
/// deliveries of the same id (a primary key plus conflict handling in SQL).
#[async_trait]
pub trait EventDeduplicator: Send + Sync {
    /// Claim `event_id`, reclaiming a claim older than the claim timeout.
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> Result<Admission, DomainError>;

    /// Mark a claimed event as completed.
    async fn complete(
        &self,
        event_id: &str,
        outcome: EventOutcome,
        detail: Option<&str>,
        now: Timestamp,
    ) -> Result<(), DomainError>;

    /// Drop a claim so the next delivery is admitted as fresh.
    async fn release(&self, event_id: &str) -> Result<(), DomainError>;

    /// Look up a record.
    async fn get(&self, event_id: &str) -> Result<Option<ProcessedEvent>, DomainError>;

    /// Delete records claimed before `cutoff`, completed or not.
    ///
    /// A claim that old was abandoned by its worker.
    ///
    /// Returns the number of records deleted.
    async fn purge_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
