//! PostgreSQL implementation of AgreementLedger.
//!
//! The compare-and-swap is a single `UPDATE ... WHERE version = $expected`
//! inside a transaction that also appends the payment, so both land or
//! neither does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{
    Agreement, AgreementStatus, BillingTerms, InvoiceMarker, Payment, PaymentKey, PaymentOutcome,
    SubscriptionRef,
};
use crate::domain::foundation::{
    AgreementId, DomainError, ErrorCode, PropertyId, TenantId, Timestamp,
};
use crate::ports::{AgreementLedger, CasOutcome};

/// PostgreSQL implementation of the AgreementLedger port.
pub struct PostgresAgreementLedger {
    pool: PgPool,
}

impl PostgresAgreementLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const AGREEMENT_COLUMNS: &str = r#"
    id, tenant_id, property_id, monthly_amount_minor, currency, billing_anchor_day,
    status, subscription_id, customer_id, subscription_attached_at, subscription_history,
    latest_invoice, grace_deadline, version, created_at, updated_at, terminated_at
"#;

/// Database row representation of an agreement.
#[derive(Debug, sqlx::FromRow)]
struct AgreementRow {
    id: Uuid,
    tenant_id: Uuid,
    property_id: Uuid,
    monthly_amount_minor: i64,
    currency: String,
    billing_anchor_day: i16,
    status: String,
    subscription_id: Option<String>,
    customer_id: Option<String>,
    subscription_attached_at: Option<DateTime<Utc>>,
    subscription_history: Json<Vec<SubscriptionRef>>,
    latest_invoice: Option<Json<InvoiceMarker>>,
    grace_deadline: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    terminated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AgreementRow> for Agreement {
    type Error = DomainError;

    fn try_from(row: AgreementRow) -> Result<Self, Self::Error> {
        let status: AgreementStatus = row
            .status
            .parse()
            .map_err(|e| corrupt(format!("Invalid status value '{}': {}", row.status, e)))?;

        let billing_anchor_day = u8::try_from(row.billing_anchor_day)
            .map_err(|_| corrupt(format!("Invalid anchor day {}", row.billing_anchor_day)))?;
        let terms = BillingTerms::new(row.monthly_amount_minor, &row.currency, billing_anchor_day)
            .map_err(|e| corrupt(format!("Invalid billing terms: {}", e)))?;

        let subscription = match (row.subscription_id, row.customer_id, row.subscription_attached_at)
        {
            (Some(subscription_id), Some(customer_id), Some(attached_at)) => Some(SubscriptionRef {
                subscription_id,
                customer_id,
                attached_at: Timestamp::from_datetime(attached_at),
            }),
            (None, _, _) => None,
            _ => return Err(corrupt("Partially stored subscription")),
        };

        let version = u64::try_from(row.version)
            .map_err(|_| corrupt(format!("Invalid version {}", row.version)))?;

        Ok(Agreement {
            id: AgreementId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            property_id: PropertyId::from_uuid(row.property_id),
            terms,
            status,
            subscription,
            subscription_history: row.subscription_history.0,
            latest_invoice: row.latest_invoice.map(|j| j.0),
            grace_deadline: row.grace_deadline.map(Timestamp::from_datetime),
            version,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            terminated_at: row.terminated_at.map(Timestamp::from_datetime),
        })
    }
}

/// Database row representation of a payment.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    agreement_id: Uuid,
    invoice_id: String,
    outcome: String,
    amount_minor: i64,
    currency: String,
    failure_reason: Option<String>,
    provider_created_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let outcome: PaymentOutcome = row
            .outcome
            .parse()
            .map_err(|e| corrupt(format!("Invalid outcome value '{}': {}", row.outcome, e)))?;
        Ok(Payment {
            agreement_id: AgreementId::from_uuid(row.agreement_id),
            invoice_id: row.invoice_id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            outcome,
            failure_reason: row.failure_reason,
            provider_created_at: Timestamp::from_datetime(row.provider_created_at),
            recorded_at: Timestamp::from_datetime(row.recorded_at),
        })
    }
}

fn corrupt(message: impl Into<String>) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, message)
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, e))
}

fn to_i64(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version).map_err(|_| corrupt(format!("Version {} out of range", version)))
}

#[async_trait]
impl AgreementLedger for PostgresAgreementLedger {
    async fn insert(&self, agreement: &Agreement) -> Result<(), DomainError> {
        let subscription = agreement.subscription.as_ref();
        sqlx::query(
            r#"
            INSERT INTO agreements (
                id, tenant_id, property_id, monthly_amount_minor, currency, billing_anchor_day,
                status, subscription_id, customer_id, subscription_attached_at,
                subscription_history, latest_invoice, grace_deadline, version,
                created_at, updated_at, terminated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(agreement.id.as_uuid())
        .bind(agreement.tenant_id.as_uuid())
        .bind(agreement.property_id.as_uuid())
        .bind(agreement.terms.monthly_amount_minor)
        .bind(&agreement.terms.currency)
        .bind(i16::from(agreement.terms.billing_anchor_day))
        .bind(agreement.status.as_str())
        .bind(subscription.map(|s| s.subscription_id.as_str()))
        .bind(subscription.map(|s| s.customer_id.as_str()))
        .bind(subscription.map(|s| *s.attached_at.as_datetime()))
        .bind(Json(&agreement.subscription_history))
        .bind(agreement.latest_invoice.as_ref().map(Json))
        .bind(agreement.grace_deadline.map(|t| *t.as_datetime()))
        .bind(to_i64(agreement.version)?)
        .bind(agreement.created_at.as_datetime())
        .bind(agreement.updated_at.as_datetime())
        .bind(agreement.terminated_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("agreements_pkey") {
                    return DomainError::new(
                        ErrorCode::AlreadyExists,
                        format!("Agreement {} already exists", agreement.id),
                    );
                }
            }
            db_error("Failed to insert agreement", e)
        })?;

        Ok(())
    }

    async fn get(&self, id: AgreementId) -> Result<Option<Agreement>, DomainError> {
        let row: Option<AgreementRow> = sqlx::query_as(&format!(
            "SELECT {} FROM agreements WHERE id = $1",
            AGREEMENT_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load agreement", e))?;

        row.map(Agreement::try_from).transpose()
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let subscription = next.subscription.as_ref();
        let updated = sqlx::query(
            r#"
            UPDATE agreements SET
                status = $3,
                subscription_id = $4,
                customer_id = $5,
                subscription_attached_at = $6,
                subscription_history = $7,
                latest_invoice = $8,
                grace_deadline = $9,
                version = $10,
                updated_at = $11,
                terminated_at = $12
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(to_i64(expected_version)?)
        .bind(next.status.as_str())
        .bind(subscription.map(|s| s.subscription_id.as_str()))
        .bind(subscription.map(|s| s.customer_id.as_str()))
        .bind(subscription.map(|s| *s.attached_at.as_datetime()))
        .bind(Json(&next.subscription_history))
        .bind(next.latest_invoice.as_ref().map(Json))
        .bind(next.grace_deadline.map(|t| *t.as_datetime()))
        .bind(to_i64(next.version)?)
        .bind(next.updated_at.as_datetime())
        .bind(next.terminated_at.map(|t| *t.as_datetime()))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update agreement", e))?;

        if updated.rows_affected() == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM agreements WHERE id = $1")
                    .bind(next.id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to read agreement version", e))?;
            return match exists {
                Some(_) => Ok(CasOutcome::Conflict),
                None => Err(DomainError::new(
                    ErrorCode::AgreementNotFound,
                    format!("Agreement {} not found", next.id),
                )),
            };
        }

        let mut payment_inserted = false;
        if let Some(payment) = payment {
            let inserted = sqlx::query(
                r#"
                INSERT INTO payments (
                    agreement_id, invoice_id, outcome, amount_minor, currency,
                    failure_reason, provider_created_at, recorded_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (agreement_id, invoice_id, outcome) DO NOTHING
                "#,
            )
            .bind(next.id.as_uuid())
            .bind(&payment.invoice_id)
            .bind(payment.outcome.as_str())
            .bind(payment.amount_minor)
            .bind(&payment.currency)
            .bind(&payment.failure_reason)
            .bind(payment.provider_created_at.as_datetime())
            .bind(payment.recorded_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to append payment", e))?;
            payment_inserted = inserted.rows_affected() == 1;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit agreement update", e))?;

        Ok(CasOutcome::Committed { payment_inserted })
    }

    async fn find_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Agreement>, DomainError> {
        let row: Option<AgreementRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM agreements
            WHERE subscription_id = $1
               OR subscription_history @> jsonb_build_array(
                      jsonb_build_object('subscription_id', $1::text))
            LIMIT 1
            "#,
            AGREEMENT_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find agreement by subscription", e))?;

        row.map(Agreement::try_from).transpose()
    }

    async fn payments(&self, id: AgreementId) -> Result<Vec<Payment>, DomainError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT agreement_id, invoice_id, outcome, amount_minor, currency,
                   failure_reason, provider_created_at, recorded_at
            FROM payments
            WHERE agreement_id = $1
            ORDER BY provider_created_at, invoice_id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load payments", e))?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn has_payment(&self, id: AgreementId, key: &PaymentKey) -> Result<bool, DomainError> {
        let found: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM payments WHERE agreement_id = $1 AND invoice_id = $2 AND outcome = $3",
        )
        .bind(id.as_uuid())
        .bind(&key.invoice_id)
        .bind(key.outcome.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to check payment", e))?;

        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> AgreementRow {
        let now = Utc::now();
        AgreementRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            monthly_amount_minor: 150_000,
            currency: "usd".to_string(),
            billing_anchor_day: 1,
            status: status.to_string(),
            subscription_id: Some("sub_1".to_string()),
            customer_id: Some("cus_1".to_string()),
            subscription_attached_at: Some(now),
            subscription_history: Json(Vec::new()),
            latest_invoice: None,
            grace_deadline: None,
            version: 3,
            created_at: now,
            updated_at: now,
            terminated_at: None,
        }
    }

    #[test]
    fn row_converts_to_agreement() {
        let agreement = Agreement::try_from(row("ACTIVE")).unwrap();
        assert_eq!(agreement.status, AgreementStatus::Active);
        assert_eq!(agreement.version, 3);
        assert_eq!(agreement.subscription.unwrap().subscription_id, "sub_1");
    }

    #[test]
    fn unknown_status_is_a_database_error() {
        let err = Agreement::try_from(row("PAUSED")).unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn partial_subscription_is_rejected() {
        let mut partial = row("ACTIVE");
        partial.customer_id = None;
        assert!(Agreement::try_from(partial).is_err());
    }

    #[test]
    fn payment_row_parses_outcome() {
        let payment = Payment::try_from(PaymentRow {
            agreement_id: Uuid::new_v4(),
            invoice_id: "in_1".to_string(),
            outcome: "failed".to_string(),
            amount_minor: 150_000,
            currency: "usd".to_string(),
            failure_reason: Some("card_declined".to_string()),
            provider_created_at: Utc::now(),
            recorded_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(payment.outcome, PaymentOutcome::Failed);
    }
}
