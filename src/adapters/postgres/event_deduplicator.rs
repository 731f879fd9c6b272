//! PostgreSQL implementation of EventDeduplicator.
//!
//! The claim is one `INSERT ... ON CONFLICT DO UPDATE ... WHERE` statement:
//! it inserts a new claim or takes over a stale uncompleted one, and
//! returns a row only when this caller now owns the claim.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::ports::{Admission, EventDeduplicator, EventOutcome, ProcessedEvent};

/// PostgreSQL implementation of the EventDeduplicator port.
pub struct PostgresEventDeduplicator {
    pool: PgPool,
    claim_timeout: Duration,
}

impl PostgresEventDeduplicator {
    pub fn new(pool: PgPool, claim_timeout: Duration) -> Self {
        Self {
            pool,
            claim_timeout,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProcessedEventRow {
    event_id: String,
    event_type: String,
    outcome: Option<String>,
    detail: Option<String>,
    claimed_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProcessedEventRow> for ProcessedEvent {
    type Error = DomainError;

    fn try_from(row: ProcessedEventRow) -> Result<Self, Self::Error> {
        let outcome = row
            .outcome
            .as_deref()
            .map(str::parse::<EventOutcome>)
            .transpose()
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?;
        Ok(ProcessedEvent {
            event_id: row.event_id,
            event_type: row.event_type,
            outcome,
            detail: row.detail,
            claimed_at: Timestamp::from_datetime(row.claimed_at),
            completed_at: row.completed_at.map(Timestamp::from_datetime),
        })
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, e))
}

#[async_trait]
impl EventDeduplicator for PostgresEventDeduplicator {
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> Result<Admission, DomainError> {
        let stale_before = now.plus(-self.claim_timeout);

        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO processed_events (event_id, event_type, claimed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO UPDATE SET
                event_type = EXCLUDED.event_type,
                claimed_at = EXCLUDED.claimed_at,
                detail = NULL
            WHERE processed_events.outcome IS NULL
              AND processed_events.claimed_at < $4
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(now.as_datetime())
        .bind(stale_before.as_datetime())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim event", e))?;

        if claimed.is_some() {
            return Ok(Admission::Fresh);
        }

        match self.get(event_id).await? {
            Some(ProcessedEvent {
                outcome: Some(outcome),
                ..
            }) => Ok(Admission::Duplicate(outcome)),
            // Live claim, or released between the two statements
            _ => Ok(Admission::InFlight),
        }
    }

    async fn complete(
        &self,
        event_id: &str,
        outcome: EventOutcome,
        detail: Option<&str>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE processed_events
            SET outcome = $2, detail = $3, completed_at = $4
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(outcome.as_str())
        .bind(detail)
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to complete event", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::NotFound,
                format!("No claim held for event {}", event_id),
            ));
        }
        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = $1 AND outcome IS NULL")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to release event claim", e))?;
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedEvent>, DomainError> {
        let row: Option<ProcessedEventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, outcome, detail, claimed_at, completed_at
            FROM processed_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load event", e))?;

        row.map(ProcessedEvent::try_from).transpose()
    }

    async fn purge_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM processed_events WHERE claimed_at < $1",
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to purge processed events", e))?;

        Ok(result.rows_affected())
    }
}
