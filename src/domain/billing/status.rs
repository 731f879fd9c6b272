//! Agreement billing status state machine.
//!
//! Tracks where a rental agreement sits in the subscription lifecycle,
//! from the local draft through collection to termination.

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Billing status of a rental agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    /// Stored locally, no remote subscription yet.
    Draft,

    /// Remote subscription exists, first invoice not yet settled.
    PendingActivation,

    /// Rent is being collected.
    Active,

    /// Latest invoice failed; the grace window is running.
    PastDue,

    /// Grace window elapsed without a successful payment.
    Suspended,

    /// Subscription ended. Absorbs every later event.
    Terminated,
}

impl AgreementStatus {
    pub const ALL: [AgreementStatus; 6] = [
        AgreementStatus::Draft,
        AgreementStatus::PendingActivation,
        AgreementStatus::Active,
        AgreementStatus::PastDue,
        AgreementStatus::Suspended,
        AgreementStatus::Terminated,
    ];

    /// Wire and storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementStatus::Draft => "DRAFT",
            AgreementStatus::PendingActivation => "PENDING_ACTIVATION",
            AgreementStatus::Active => "ACTIVE",
            AgreementStatus::PastDue => "PAST_DUE",
            AgreementStatus::Suspended => "SUSPENDED",
            AgreementStatus::Terminated => "TERMINATED",
        }
    }

    /// Returns true once a remote subscription has been acknowledged.
    pub fn has_remote_subscription(&self) -> bool {
        !matches!(self, AgreementStatus::Draft | AgreementStatus::Terminated)
    }
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgreementStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgreementStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::invalid_format("status", format!("unknown status '{}'", s)))
    }
}

impl StateMachine for AgreementStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use AgreementStatus::*;
        matches!(
            (self, target),
            // From DRAFT
            (Draft, PendingActivation)
                | (Draft, Terminated) // Local cancel, nothing remote
            // From PENDING_ACTIVATION
                | (PendingActivation, Active)
                | (PendingActivation, PastDue)
                | (PendingActivation, Terminated)
            // From ACTIVE
                | (Active, Active) // Renewal
                | (Active, PastDue)
                | (Active, Terminated)
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, PastDue) // Grace extended
                | (PastDue, Suspended)
                | (PastDue, Terminated)
            // From SUSPENDED
                | (Suspended, Active)
                | (Suspended, Terminated)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use AgreementStatus::*;
        match self {
            Draft => vec![PendingActivation, Terminated],
            PendingActivation => vec![Active, PastDue, Terminated],
            Active => vec![Active, PastDue, Terminated],
            PastDue => vec![Active, PastDue, Suspended, Terminated],
            Suspended => vec![Active, Terminated],
            Terminated => vec![],
        }
    }
}
