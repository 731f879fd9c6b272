//! NotificationSink port - delivery of tenant/landlord notifications.
//!
//! Delivery itself (email, SMS, push) lives outside this service. The sink
//! is called off the transaction path; its failures never roll back a
//! committed transition.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::billing::NotificationKind;
use crate::domain::foundation::{AgreementId, DomainError, Timestamp};

/// A notification about one agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub agreement_id: AgreementId,
    pub kind: NotificationKind,
    pub occurred_at: Timestamp,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), DomainError>;
}
