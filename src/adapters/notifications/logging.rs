//! Notification sink that writes to the tracing pipeline.
//!
//! Delivery channels (email, SMS) sit downstream of the log shipper.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::ports::{Notification, NotificationSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSink;

impl LoggingNotificationSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<(), DomainError> {
        tracing::info!(
            target: "rent_billing::notifications",
            agreement_id = %notification.agreement_id,
            kind = %notification.kind,
            occurred_at = %notification.occurred_at,
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::NotificationKind;
    use crate::domain::foundation::{AgreementId, Timestamp};

    #[tokio::test]
    async fn logging_sink_never_fails() {
        let sink = LoggingNotificationSink::new();
        let result = sink
            .notify(&Notification {
                agreement_id: AgreementId::new(),
                kind: NotificationKind::PaymentReminder,
                occurred_at: Timestamp::now(),
            })
            .await;

        assert!(result.is_ok());
    }
}
