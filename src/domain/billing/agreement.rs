//! Agreement aggregate: the billing side of a rental agreement.
//!
//! # Design Decisions
//!
//! - **Money in minor units**: amounts are i64 cents, never floats
//! - **Versioned**: every committed write bumps `version`; the ledger
//!   compares it before storing
//! - **One active subscription**: retired subscription refs move to
//!   `subscription_history` and are never deleted

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    AgreementId, DomainError, ErrorCode, PropertyId, StateMachine, TenantId, Timestamp,
    ValidationError,
};

use super::{AgreementStatus, InvoiceMarker};

/// Recurring charge terms for an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingTerms {
    /// Monthly rent in minor units.
    pub monthly_amount_minor: i64,
    /// ISO-4217 code, lower-case.
    pub currency: String,
    /// Day of month the billing cycle is anchored to (1-31).
    pub billing_anchor_day: u8,
}

impl BillingTerms {
    /// Validates and normalizes billing terms.
    pub fn new(
        monthly_amount_minor: i64,
        currency: impl AsRef<str>,
        billing_anchor_day: u8,
    ) -> Result<Self, ValidationError> {
        if monthly_amount_minor <= 0 {
            return Err(ValidationError::invalid_format(
                "monthly_amount_minor",
                "must be a positive amount in minor units",
            ));
        }

        let currency = currency.as_ref().trim().to_ascii_lowercase();
        if currency.is_empty() {
            return Err(ValidationError::empty_field("currency"));
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                "expected a three letter ISO-4217 code",
            ));
        }

        if !(1..=31).contains(&billing_anchor_day) {
            return Err(ValidationError::out_of_range(
                "billing_anchor_day",
                1,
                31,
                billing_anchor_day as i32,
            ));
        }

        Ok(Self {
            monthly_amount_minor,
            currency,
            billing_anchor_day,
        })
    }

    /// Start of the first billing cycle for terms agreed at `now`.
    pub fn next_anchor(&self, now: Timestamp) -> Timestamp {
        Timestamp::from_datetime(next_billing_anchor(self.billing_anchor_day, *now.as_datetime()))
    }
}

/// First midnight (UTC) strictly after `now` that falls on `anchor_day`,
/// clamped to the last day of shorter months.
pub fn next_billing_anchor(anchor_day: u8, now: DateTime<Utc>) -> DateTime<Utc> {
    let (mut year, mut month) = (now.year(), now.month());
    loop {
        let day = u32::from(anchor_day).clamp(1, days_in_month(year, month));
        let candidate = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive));

        if let Some(candidate) = candidate {
            if candidate > now {
                return candidate;
            }
        }

        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

/// Handle on a remote processor subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    /// Processor subscription id (`sub_...`).
    pub subscription_id: String,
    /// Processor customer id (`cus_...`).
    pub customer_id: String,
    pub attached_at: Timestamp,
}

/// How a subscription id relates to an agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMatch {
    Current,
    Historical,
    Unrelated,
}

/// Agreement aggregate.
///
/// # Invariants
///
/// - At most one active `subscription`
/// - `grace_deadline` is set exactly while `PAST_DUE`
/// - `TERMINATED` is absorbing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: AgreementId,
    pub tenant_id: TenantId,
    pub property_id: PropertyId,
    pub terms: BillingTerms,
    pub status: AgreementStatus,
    pub subscription: Option<SubscriptionRef>,
    pub subscription_history: Vec<SubscriptionRef>,
    pub latest_invoice: Option<InvoiceMarker>,
    pub grace_deadline: Option<Timestamp>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub terminated_at: Option<Timestamp>,
}

impl Agreement {
    /// Creates a local draft with no remote subscription.
    pub fn draft(
        id: AgreementId,
        tenant_id: TenantId,
        property_id: PropertyId,
        terms: BillingTerms,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            tenant_id,
            property_id,
            terms,
            status: AgreementStatus::Draft,
            subscription: None,
            subscription_history: Vec::new(),
            latest_invoice: None,
            grace_deadline: None,
            version: 1,
            created_at: now,
            updated_at: now,
            terminated_at: None,
        }
    }

    /// Classifies a processor subscription id against this agreement.
    pub fn subscription_match(&self, subscription_id: &str) -> SubscriptionMatch {
        if self
            .subscription
            .as_ref()
            .is_some_and(|s| s.subscription_id == subscription_id)
        {
            SubscriptionMatch::Current
        } else if self
            .subscription_history
            .iter()
            .any(|s| s.subscription_id == subscription_id)
        {
            SubscriptionMatch::Historical
        } else {
            SubscriptionMatch::Unrelated
        }
    }

    /// Returns a copy prepared for the next committed write.
    pub fn next_revision(&self, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = now;
        next
    }

    /// Records the gateway acknowledgement of the remote subscription.
    pub fn attach_subscription(&mut self, subscription: SubscriptionRef) -> Result<(), DomainError> {
        self.transition_to(AgreementStatus::PendingActivation)?;
        if let Some(previous) = self.subscription.replace(subscription) {
            self.subscription_history.push(previous);
        }
        Ok(())
    }

    /// A newer invoice succeeded.
    pub fn settle(&mut self, invoice: InvoiceMarker) -> Result<(), DomainError> {
        self.transition_to(AgreementStatus::Active)?;
        self.latest_invoice = Some(invoice);
        self.grace_deadline = None;
        Ok(())
    }

    /// A newer invoice failed; starts or extends the grace window.
    pub fn mark_past_due(
        &mut self,
        invoice: InvoiceMarker,
        grace_deadline: Timestamp,
    ) -> Result<(), DomainError> {
        self.transition_to(AgreementStatus::PastDue)?;
        self.latest_invoice = Some(invoice);
        self.grace_deadline = Some(grace_deadline);
        Ok(())
    }

    /// Advances the invoice marker without touching the status.
    pub fn observe_invoice(&mut self, invoice: InvoiceMarker) {
        self.latest_invoice = Some(invoice);
    }

    /// The grace window elapsed without recovery.
    pub fn suspend(&mut self) -> Result<(), DomainError> {
        self.transition_to(AgreementStatus::Suspended)?;
        self.grace_deadline = None;
        Ok(())
    }

    /// Ends the agreement; the active subscription is retired to history.
    pub fn terminate(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(AgreementStatus::Terminated)?;
        if let Some(subscription) = self.subscription.take() {
            self.subscription_history.push(subscription);
        }
        self.grace_deadline = None;
        self.terminated_at = Some(now);
        Ok(())
    }

    /// Returns true if the grace window has elapsed at `now`.
    pub fn grace_expired(&self, now: Timestamp) -> bool {
        self.status == AgreementStatus::PastDue
            && self.grace_deadline.is_some_and(|deadline| !now.is_before(&deadline))
    }

    fn transition_to(&mut self, target: AgreementStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot transition from {} to {}", self.status, target),
            )
            .with_detail("agreement_id", self.id.to_string())
        })?;
        Ok(())
    }
}
