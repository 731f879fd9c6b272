//! HandleProcessorWebhookHandler - Command handler for payment processor webhooks.
//!
//! Order of operations:
//!
//! 1. verify the signature (nothing is read or written before this passes)
//! 2. claim the event id in the deduplicator
//! 3. decode, resolve the agreement, apply through the engine
//! 4. complete the claim, or release it when the failure is retryable so
//!    the processor's redelivery gets a fresh attempt

use std::sync::Arc;

use crate::application::errors::BillingError;
use crate::application::gateway_retry::RetryPolicy;
use crate::application::reconciliation_engine::ReconciliationEngine;
use crate::domain::billing::{
    AgreementStatus, BillingEvent, DecisionOutcome, ProcessorEvent, ReconcileInput,
    StripeWebhookVerifier, SubscriptionMatch, WebhookError,
};
use crate::domain::foundation::{AgreementId, Timestamp};
use crate::ports::{
    Admission, AgreementLedger, EventDeduplicator, EventOutcome, SubscriptionGateway,
};

use super::cancel_agreement::cancel_orphan;

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleProcessorWebhookCommand {
    /// Raw request body, exactly as signed.
    pub payload: Vec<u8>,
    /// `Stripe-Signature` header value.
    pub signature: Option<String>,
}

/// How a delivery was disposed of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Applied to an agreement (possibly as a no-op).
    Applied {
        event_id: String,
        agreement_id: AgreementId,
        outcome: DecisionOutcome,
    },
    /// Recorded without touching any agreement.
    Ignored { event_id: String, reason: String },
    /// Already processed earlier.
    Duplicate {
        event_id: String,
        outcome: EventOutcome,
    },
    /// Another worker holds the claim.
    InFlight { event_id: String },
}

impl WebhookDisposition {
    pub fn event_id(&self) -> &str {
        match self {
            WebhookDisposition::Applied { event_id, .. }
            | WebhookDisposition::Ignored { event_id, .. }
            | WebhookDisposition::Duplicate { event_id, .. }
            | WebhookDisposition::InFlight { event_id } => event_id,
        }
    }
}

/// Handler for processor webhooks.
pub struct HandleProcessorWebhookHandler {
    verifier: StripeWebhookVerifier,
    deduplicator: Arc<dyn EventDeduplicator>,
    engine: Arc<ReconciliationEngine>,
    gateway: Arc<dyn SubscriptionGateway>,
    retry: RetryPolicy,
}

impl HandleProcessorWebhookHandler {
    pub fn new(
        verifier: StripeWebhookVerifier,
        deduplicator: Arc<dyn EventDeduplicator>,
        engine: Arc<ReconciliationEngine>,
        gateway: Arc<dyn SubscriptionGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            verifier,
            deduplicator,
            engine,
            gateway,
            retry,
        }
    }

    pub async fn handle(
        &self,
        cmd: HandleProcessorWebhookCommand,
        now: Timestamp,
    ) -> Result<WebhookDisposition, BillingError> {
        // 1. Authenticate
        let signature = cmd.signature.ok_or(WebhookError::MissingSignature)?;
        let event = self
            .verifier
            .verify_and_parse(&cmd.payload, &signature, now)
            .map_err(|e| {
                tracing::warn!(reason = e.reason(), "Webhook rejected");
                e
            })?;
        let event_id = event.id.clone();

        // 2. Claim
        match self
            .deduplicator
            .admit(&event_id, &event.event_type, now)
            .await?
        {
            Admission::Fresh => {}
            Admission::Duplicate(outcome) => {
                tracing::info!(event_id = %event_id, outcome = %outcome, "Duplicate webhook skipped");
                return Ok(WebhookDisposition::Duplicate { event_id, outcome });
            }
            Admission::InFlight => {
                tracing::info!(event_id = %event_id, "Webhook already in flight");
                return Ok(WebhookDisposition::InFlight { event_id });
            }
        }

        // 3. Process
        let result = self.process(&event, now).await;

        // 4. Settle the claim
        match result {
            Ok(disposition) => {
                let (outcome, detail) = match &disposition {
                    WebhookDisposition::Ignored { reason, .. } => {
                        (EventOutcome::Ignored, Some(reason.as_str()))
                    }
                    _ => (EventOutcome::Applied, None),
                };
                self.deduplicator
                    .complete(&event_id, outcome, detail, now)
                    .await?;
                Ok(disposition)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(event_id = %event_id, error = %e, "Webhook processing deferred");
                if let Err(release_err) = self.deduplicator.release(&event_id).await {
                    tracing::error!(
                        event_id = %event_id,
                        error = %release_err,
                        "Failed to release event claim"
                    );
                }
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event_id,
                    event_type = %event.event_type,
                    error = %e,
                    alert = true,
                    "Webhook could not be applied"
                );
                let reason = e.to_string();
                self.deduplicator
                    .complete(&event_id, EventOutcome::Failed, Some(&reason), now)
                    .await?;
                Ok(WebhookDisposition::Ignored { event_id, reason })
            }
        }
    }

    async fn process(
        &self,
        event: &ProcessorEvent,
        now: Timestamp,
    ) -> Result<WebhookDisposition, BillingError> {
        let ignored = |reason: String| WebhookDisposition::Ignored {
            event_id: event.id.clone(),
            reason,
        };

        let billing_event = match BillingEvent::decode(event) {
            Ok(billing_event) => billing_event,
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Undecodable webhook"
                );
                return Ok(ignored(format!("undecodable: {}", e)));
            }
        };

        if let BillingEvent::SubscriptionStatusChanged { status, .. } = &billing_event {
            let reason = self.observe_remote_status(event, &billing_event, status).await?;
            return Ok(ignored(reason));
        }

        let Some(input) = ReconcileInput::from_event(&billing_event) else {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Unhandled event type");
            return Ok(ignored(format!("unhandled event type {}", event.event_type)));
        };

        let Some(agreement_id) = self.resolve_agreement(&billing_event).await? else {
            tracing::warn!(
                event_id = %event.id,
                subscription_id = billing_event.subscription_id().unwrap_or_default(),
                "Webhook for unknown agreement"
            );
            return Ok(ignored("unknown agreement".to_string()));
        };

        let applied = match self.engine.apply(agreement_id, input.clone(), &event.id, now).await {
            Ok(applied) => applied,
            Err(BillingError::NotFound(_)) => return Ok(ignored("unknown agreement".to_string())),
            Err(e) => return Err(e),
        };

        if let ReconcileInput::SubscriptionAcknowledged(subscription) = &input {
            let orphaned = applied.agreement.status == AgreementStatus::Terminated
                && applied.agreement.subscription_match(&subscription.subscription_id)
                    == SubscriptionMatch::Unrelated;
            if orphaned {
                cancel_orphan(
                    self.gateway.as_ref(),
                    &self.retry,
                    agreement_id,
                    &subscription.subscription_id,
                )
                .await;
            }
        }

        Ok(WebhookDisposition::Applied {
            event_id: event.id.clone(),
            agreement_id,
            outcome: applied.outcome,
        })
    }

    /// Logs a remote subscription status next to the local one.
    async fn observe_remote_status(
        &self,
        event: &ProcessorEvent,
        billing_event: &BillingEvent,
        remote_status: &str,
    ) -> Result<String, BillingError> {
        let subscription_id = billing_event.subscription_id().unwrap_or_default();
        let local = match self.resolve_agreement(billing_event).await? {
            Some(id) => self.engine.ledger().get(id).await?,
            None => None,
        };

        let Some(agreement) = local else {
            tracing::info!(
                event_id = %event.id,
                subscription_id,
                remote_status,
                "Remote subscription status for unknown agreement"
            );
            return Ok(format!("remote status {} for unknown agreement", remote_status));
        };

        if remote_status_diverges(agreement.status, remote_status) {
            tracing::warn!(
                event_id = %event.id,
                agreement_id = %agreement.id,
                subscription_id,
                local_status = %agreement.status,
                remote_status,
                "Remote subscription status differs from local state"
            );
        } else {
            tracing::info!(
                event_id = %event.id,
                agreement_id = %agreement.id,
                subscription_id,
                local_status = %agreement.status,
                remote_status,
                "Remote subscription status observed"
            );
        }
        Ok(format!("remote status {} observed", remote_status))
    }

    /// Metadata id first, then the subscription index.
    async fn resolve_agreement(
        &self,
        event: &BillingEvent,
    ) -> Result<Option<AgreementId>, BillingError> {
        if let Some(id) = event.agreement_id() {
            return Ok(Some(id));
        }
        let Some(subscription_id) = event.subscription_id() else {
            return Ok(None);
        };
        Ok(self
            .engine
            .ledger()
            .find_by_subscription(subscription_id)
            .await?
            .map(|a| a.id))
    }
}

/// Whether the processor's view contradicts the local status. Invoices
/// settle the difference; the mismatch is only reported.
fn remote_status_diverges(local: AgreementStatus, remote: &str) -> bool {
    match remote {
        "past_due" | "unpaid" => {
            matches!(local, AgreementStatus::Active | AgreementStatus::PendingActivation)
        }
        "active" | "trialing" => {
            matches!(local, AgreementStatus::Suspended | AgreementStatus::Terminated)
        }
        _ => false,
    }
}
