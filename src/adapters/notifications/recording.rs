//! In-memory notification sink for tests.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use crate::domain::billing::NotificationKind;
use crate::domain::foundation::{AgreementId, DomainError, ErrorCode};
use crate::ports::{Notification, NotificationSink};

/// Records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    received: Mutex<Vec<Notification>>,
    fail: Mutex<bool>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent delivery fail (after recording it).
    pub fn fail_deliveries(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notifications().into_iter().map(|n| n.kind).collect()
    }

    pub fn count(&self, agreement_id: AgreementId, kind: NotificationKind) -> usize {
        self.notifications()
            .iter()
            .filter(|n| n.agreement_id == agreement_id && n.kind == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<(), DomainError> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());

        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                "Simulated notification failure",
            ));
        }
        Ok(())
    }
}
