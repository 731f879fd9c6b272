//! Side effects requested by a committed reconciliation decision.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::Timestamp;

/// What the tenant or landlord should be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AgreementActivated,
    PaymentSucceeded,
    PaymentRecovered,
    PaymentFailed,
    PaymentActionRequired,
    PaymentReminder,
    AgreementSuspended,
    AgreementTerminated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AgreementActivated => "agreement_activated",
            NotificationKind::PaymentSucceeded => "payment_succeeded",
            NotificationKind::PaymentRecovered => "payment_recovered",
            NotificationKind::PaymentFailed => "payment_failed",
            NotificationKind::PaymentActionRequired => "payment_action_required",
            NotificationKind::PaymentReminder => "payment_reminder",
            NotificationKind::AgreementSuspended => "agreement_suspended",
            NotificationKind::AgreementTerminated => "agreement_terminated",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work dispatched only by the writer whose compare-and-swap committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(NotificationKind),
    ScheduleDunning { grace_deadline: Timestamp },
    ClearDunning,
}
