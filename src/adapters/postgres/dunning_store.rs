//! PostgreSQL implementation of DunningTaskStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::DunningTask;
use crate::domain::foundation::{AgreementId, DomainError, ErrorCode, Timestamp};
use crate::ports::DunningTaskStore;

/// PostgreSQL implementation of the DunningTaskStore port.
pub struct PostgresDunningStore {
    pool: PgPool,
}

impl PostgresDunningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DunningTaskRow {
    agreement_id: Uuid,
    next_check_at: DateTime<Utc>,
    attempt: i32,
    grace_deadline: DateTime<Utc>,
}

impl From<DunningTaskRow> for DunningTask {
    fn from(row: DunningTaskRow) -> Self {
        DunningTask {
            agreement_id: AgreementId::from_uuid(row.agreement_id),
            next_check_at: Timestamp::from_datetime(row.next_check_at),
            attempt: u32::try_from(row.attempt).unwrap_or(0),
            grace_deadline: Timestamp::from_datetime(row.grace_deadline),
        }
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, e))
}

#[async_trait]
impl DunningTaskStore for PostgresDunningStore {
    async fn upsert(&self, task: &DunningTask) -> Result<(), DomainError> {
        let attempt = i32::try_from(task.attempt).map_err(|_| {
            DomainError::validation("attempt", format!("attempt {} out of range", task.attempt))
        })?;

        sqlx::query(
            r#"
            INSERT INTO dunning_tasks (agreement_id, next_check_at, attempt, grace_deadline)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (agreement_id) DO UPDATE SET
                next_check_at = EXCLUDED.next_check_at,
                attempt = EXCLUDED.attempt,
                grace_deadline = EXCLUDED.grace_deadline
            "#,
        )
        .bind(task.agreement_id.as_uuid())
        .bind(task.next_check_at.as_datetime())
        .bind(attempt)
        .bind(task.grace_deadline.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save dunning task", e))?;

        Ok(())
    }

    async fn get(&self, agreement_id: AgreementId) -> Result<Option<DunningTask>, DomainError> {
        let row: Option<DunningTaskRow> = sqlx::query_as(
            r#"
            SELECT agreement_id, next_check_at, attempt, grace_deadline
            FROM dunning_tasks
            WHERE agreement_id = $1
            "#,
        )
        .bind(agreement_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load dunning task", e))?;

        Ok(row.map(DunningTask::from))
    }

    async fn remove(&self, agreement_id: AgreementId) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM dunning_tasks WHERE agreement_id = $1")
            .bind(agreement_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to remove dunning task", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<DunningTask>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<DunningTaskRow> = sqlx::query_as(
            r#"
            SELECT agreement_id, next_check_at, attempt, grace_deadline
            FROM dunning_tasks
            WHERE next_check_at <= $1
            ORDER BY next_check_at
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load due dunning tasks", e))?;

        Ok(rows.into_iter().map(DunningTask::from).collect())
    }
}
