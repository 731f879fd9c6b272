//! Processor event envelope and its decoding into billing events.
//!
//! Raw payloads are decoded once, at the boundary, into the closed
//! [`BillingEvent`] enum. Only fields the reconciliation needs are captured.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::foundation::{AgreementId, Timestamp};

use super::PaymentOutcome;

/// Metadata key carrying the local agreement id on processor objects.
pub const AGREEMENT_METADATA_KEY: &str = "agreement_id";

/// Processor webhook event (Stripe wire format, simplified).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorEvent {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    /// Type of event (e.g., "invoice.payment_failed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    pub created: i64,

    /// Object containing event-specific data.
    pub data: ProcessorEventData,

    /// Whether this is a live mode event.
    #[serde(default)]
    pub livemode: bool,

    /// API version used to render this event.
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorEventData {
    /// The object that triggered the event (polymorphic based on event type).
    pub object: serde_json::Value,
}

impl ProcessorEvent {
    /// Parses the envelope of a raw payload.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

/// Event types the reconciliation understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaid,
    InvoicePaymentFailed,
    InvoicePaymentActionRequired,
    Unknown,
}

impl ProcessorEventType {
    /// Parse event type from its wire name.
    pub fn parse(s: &str) -> Self {
        match s {
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice.paid" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "invoice.payment_action_required" => Self::InvoicePaymentActionRequired,
            _ => Self::Unknown,
        }
    }
}

// ══════════════════════════════════════════════════════════════
// Wire objects
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    amount_paid: i64,
    currency: String,
    created: i64,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    subscription_details: Option<SubscriptionDetails>,
    #[serde(default)]
    last_finalization_error: Option<FinalizationError>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionDetails {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FinalizationError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    canceled_at: Option<i64>,
    #[serde(default)]
    ended_at: Option<i64>,
}

// ══════════════════════════════════════════════════════════════
// Decoded events
// ══════════════════════════════════════════════════════════════

/// One invoice outcome reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceFact {
    pub agreement_id: Option<AgreementId>,
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub invoice_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: Timestamp,
    pub failure_reason: Option<String>,
}

/// A subscription lifecycle fact reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFact {
    pub agreement_id: Option<AgreementId>,
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub occurred_at: Timestamp,
}

/// Closed set of events the reconciliation engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    SubscriptionCreated(SubscriptionFact),
    InvoiceSucceeded(InvoiceFact),
    InvoiceFailed(InvoiceFact),
    InvoiceActionRequired(InvoiceFact),
    SubscriptionCanceled(SubscriptionFact),
    /// Remote status change short of cancellation (`active`, `past_due`,
    /// `unpaid`, ...). Invoices drive local status; this is only observed.
    SubscriptionStatusChanged {
        fact: SubscriptionFact,
        status: String,
    },
    /// Anything else; acknowledged and ignored.
    Unknown { event_type: String },
}

/// Why a known event type could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed event object: {0}")]
    Malformed(String),

    #[error("invoice {0} is not tied to a subscription")]
    NoSubscription(String),

    #[error("timestamp {0} is out of range")]
    BadTimestamp(i64),
}

impl BillingEvent {
    /// Decodes a verified envelope.
    pub fn decode(event: &ProcessorEvent) -> Result<Self, DecodeError> {
        match ProcessorEventType::parse(&event.event_type) {
            ProcessorEventType::SubscriptionCreated => {
                Ok(BillingEvent::SubscriptionCreated(subscription_fact(event)?))
            }
            ProcessorEventType::SubscriptionDeleted => {
                Ok(BillingEvent::SubscriptionCanceled(subscription_fact(event)?))
            }
            ProcessorEventType::SubscriptionUpdated => {
                let object: SubscriptionObject = event.object()?;
                match object.status {
                    Some(status) if status == "canceled" => {
                        Ok(BillingEvent::SubscriptionCanceled(subscription_fact(event)?))
                    }
                    Some(status) => Ok(BillingEvent::SubscriptionStatusChanged {
                        fact: subscription_fact(event)?,
                        status,
                    }),
                    None => Ok(BillingEvent::Unknown {
                        event_type: event.event_type.clone(),
                    }),
                }
            }
            ProcessorEventType::InvoicePaymentSucceeded | ProcessorEventType::InvoicePaid => Ok(
                BillingEvent::InvoiceSucceeded(invoice_fact(event, PaymentOutcome::Succeeded)?),
            ),
            ProcessorEventType::InvoicePaymentFailed => Ok(BillingEvent::InvoiceFailed(
                invoice_fact(event, PaymentOutcome::Failed)?,
            )),
            ProcessorEventType::InvoicePaymentActionRequired => Ok(
                BillingEvent::InvoiceActionRequired(invoice_fact(event, PaymentOutcome::Pending)?),
            ),
            ProcessorEventType::Unknown => Ok(BillingEvent::Unknown {
                event_type: event.event_type.clone(),
            }),
        }
    }

    /// Agreement id carried in processor metadata, if any.
    pub fn agreement_id(&self) -> Option<AgreementId> {
        match self {
            BillingEvent::SubscriptionCreated(fact)
            | BillingEvent::SubscriptionCanceled(fact)
            | BillingEvent::SubscriptionStatusChanged { fact, .. } => fact.agreement_id,
            BillingEvent::InvoiceSucceeded(fact)
            | BillingEvent::InvoiceFailed(fact)
            | BillingEvent::InvoiceActionRequired(fact) => fact.agreement_id,
            BillingEvent::Unknown { .. } => None,
        }
    }

    /// Processor subscription id the event refers to, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            BillingEvent::SubscriptionCreated(fact)
            | BillingEvent::SubscriptionCanceled(fact)
            | BillingEvent::SubscriptionStatusChanged { fact, .. } => Some(&fact.subscription_id),
            BillingEvent::InvoiceSucceeded(fact)
            | BillingEvent::InvoiceFailed(fact)
            | BillingEvent::InvoiceActionRequired(fact) => Some(&fact.subscription_id),
            BillingEvent::Unknown { .. } => None,
        }
    }
}

fn timestamp(secs: i64) -> Result<Timestamp, DecodeError> {
    Timestamp::from_unix_secs(secs).ok_or(DecodeError::BadTimestamp(secs))
}

fn agreement_from(metadata: &HashMap<String, String>) -> Option<AgreementId> {
    metadata
        .get(AGREEMENT_METADATA_KEY)
        .and_then(|raw| raw.parse().ok())
}

fn invoice_fact(event: &ProcessorEvent, outcome: PaymentOutcome) -> Result<InvoiceFact, DecodeError> {
    let invoice: InvoiceObject = event.object()?;
    let subscription_id = invoice
        .subscription
        .clone()
        .ok_or_else(|| DecodeError::NoSubscription(invoice.id.clone()))?;

    let agreement_id = agreement_from(&invoice.metadata).or_else(|| {
        invoice
            .subscription_details
            .as_ref()
            .and_then(|details| agreement_from(&details.metadata))
    });

    let amount_minor = match outcome {
        PaymentOutcome::Succeeded => invoice.amount_paid,
        PaymentOutcome::Failed | PaymentOutcome::Pending => invoice.amount_due,
    };

    let failure_reason = match outcome {
        PaymentOutcome::Failed => Some(
            invoice
                .last_finalization_error
                .and_then(|e| e.message.or(e.code))
                .unwrap_or_else(|| "payment_failed".to_string()),
        ),
        _ => None,
    };

    Ok(InvoiceFact {
        agreement_id,
        subscription_id,
        customer_id: invoice.customer,
        invoice_id: invoice.id,
        amount_minor,
        currency: invoice.currency.to_ascii_lowercase(),
        created_at: timestamp(invoice.created)?,
        failure_reason,
    })
}

fn subscription_fact(event: &ProcessorEvent) -> Result<SubscriptionFact, DecodeError> {
    let subscription: SubscriptionObject = event.object()?;
    let occurred = subscription
        .canceled_at
        .or(subscription.ended_at)
        .unwrap_or(event.created);

    Ok(SubscriptionFact {
        agreement_id: agreement_from(&subscription.metadata),
        subscription_id: subscription.id,
        customer_id: subscription.customer,
        occurred_at: timestamp(occurred)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, object: serde_json::Value) -> ProcessorEvent {
        ProcessorEvent {
            id: "evt_1".to_string(),
            event_type: event_type.to_string(),
            created: 1_704_067_200,
            data: ProcessorEventData { object },
            livemode: false,
            api_version: Some("2023-10-16".to_string()),
        }
    }

    fn invoice(agreement: &AgreementId) -> serde_json::Value {
        json!({
            "id": "in_42",
            "object": "invoice",
            "subscription": "sub_1",
            "customer": "cus_1",
            "amount_due": 125000,
            "amount_paid": 125000,
            "currency": "USD",
            "created": 1704067100,
            "subscription_details": { "metadata": { "agreement_id": agreement.to_string() } }
        })
    }

    #[test]
    fn envelope_parses_from_raw_payload() {
        let raw = br#"{"id":"evt_9","type":"invoice.paid","created":1,"data":{"object":{}},"livemode":true}"#;
        let event = ProcessorEvent::parse(raw).unwrap();

        assert_eq!(event.id, "evt_9");
        assert_eq!(event.event_type, "invoice.paid");
        assert!(event.livemode);
        assert!(event.api_version.is_none());
    }

    #[test]
    fn envelope_rejects_garbage() {
        assert!(ProcessorEvent::parse(b"not json").is_err());
        assert!(ProcessorEvent::parse(br#"{"id":"evt_1"}"#).is_err());
    }

    #[test]
    fn succeeded_invoice_decodes_with_agreement_from_subscription_details() {
        let agreement = AgreementId::new();
        let event = envelope("invoice.payment_succeeded", invoice(&agreement));

        let decoded = BillingEvent::decode(&event).unwrap();

        match decoded {
            BillingEvent::InvoiceSucceeded(fact) => {
                assert_eq!(fact.agreement_id, Some(agreement));
                assert_eq!(fact.invoice_id, "in_42");
                assert_eq!(fact.subscription_id, "sub_1");
                assert_eq!(fact.amount_minor, 125_000);
                assert_eq!(fact.currency, "usd");
                assert_eq!(fact.created_at.as_unix_secs(), 1_704_067_100);
                assert!(fact.failure_reason.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invoice_metadata_takes_precedence() {
        let direct = AgreementId::new();
        let mut object = invoice(&AgreementId::new());
        object["metadata"] = json!({ "agreement_id": direct.to_string() });

        let decoded = BillingEvent::decode(&envelope("invoice.payment_failed", object)).unwrap();

        assert_eq!(decoded.agreement_id(), Some(direct));
    }

    #[test]
    fn failed_invoice_uses_amount_due_and_carries_reason() {
        let agreement = AgreementId::new();
        let mut object = invoice(&agreement);
        object["amount_paid"] = json!(0);
        object["last_finalization_error"] = json!({ "code": "card_declined" });

        let decoded = BillingEvent::decode(&envelope("invoice.payment_failed", object)).unwrap();

        match decoded {
            BillingEvent::InvoiceFailed(fact) => {
                assert_eq!(fact.amount_minor, 125_000);
                assert_eq!(fact.failure_reason.as_deref(), Some("card_declined"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invoice_paid_is_treated_as_success() {
        let decoded =
            BillingEvent::decode(&envelope("invoice.paid", invoice(&AgreementId::new()))).unwrap();
        assert!(matches!(decoded, BillingEvent::InvoiceSucceeded(_)));
    }

    #[test]
    fn action_required_decodes_as_pending() {
        let decoded = BillingEvent::decode(&envelope(
            "invoice.payment_action_required",
            invoice(&AgreementId::new()),
        ))
        .unwrap();
        assert!(matches!(decoded, BillingEvent::InvoiceActionRequired(_)));
    }

    #[test]
    fn invoice_without_subscription_is_rejected() {
        let mut object = invoice(&AgreementId::new());
        object["subscription"] = serde_json::Value::Null;

        let result = BillingEvent::decode(&envelope("invoice.payment_failed", object));

        assert_eq!(result, Err(DecodeError::NoSubscription("in_42".to_string())));
    }

    #[test]
    fn malformed_invoice_is_rejected() {
        let result = BillingEvent::decode(&envelope("invoice.paid", json!({ "id": 7 })));
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn subscription_deleted_decodes_as_canceled() {
        let agreement = AgreementId::new();
        let object = json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "canceled",
            "canceled_at": 1704000000,
            "metadata": { "agreement_id": agreement.to_string() }
        });

        let decoded =
            BillingEvent::decode(&envelope("customer.subscription.deleted", object)).unwrap();

        match decoded {
            BillingEvent::SubscriptionCanceled(fact) => {
                assert_eq!(fact.agreement_id, Some(agreement));
                assert_eq!(fact.subscription_id, "sub_1");
                assert_eq!(fact.occurred_at.as_unix_secs(), 1_704_000_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn subscription_updated_keeps_the_remote_status() {
        let agreement = AgreementId::new();
        let past_due = json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "past_due",
            "metadata": { "agreement_id": agreement.to_string() }
        });
        let canceled = json!({ "id": "sub_1", "status": "canceled" });
        let bare = json!({ "id": "sub_1" });

        match BillingEvent::decode(&envelope("customer.subscription.updated", past_due)).unwrap() {
            BillingEvent::SubscriptionStatusChanged { fact, status } => {
                assert_eq!(status, "past_due");
                assert_eq!(fact.subscription_id, "sub_1");
                assert_eq!(fact.agreement_id, Some(agreement));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            BillingEvent::decode(&envelope("customer.subscription.updated", canceled)).unwrap(),
            BillingEvent::SubscriptionCanceled(_)
        ));
        assert!(matches!(
            BillingEvent::decode(&envelope("customer.subscription.updated", bare)).unwrap(),
            BillingEvent::Unknown { .. }
        ));
    }

    #[test]
    fn subscription_created_falls_back_to_event_time() {
        let decoded = BillingEvent::decode(&envelope(
            "customer.subscription.created",
            json!({ "id": "sub_1", "customer": "cus_1" }),
        ))
        .unwrap();

        match decoded {
            BillingEvent::SubscriptionCreated(fact) => {
                assert_eq!(fact.occurred_at.as_unix_secs(), 1_704_067_200);
                assert!(fact.agreement_id.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_types_are_preserved() {
        let decoded =
            BillingEvent::decode(&envelope("charge.refunded", json!({ "id": "ch_1" }))).unwrap();
        assert_eq!(
            decoded,
            BillingEvent::Unknown {
                event_type: "charge.refunded".to_string()
            }
        );
        assert!(decoded.subscription_id().is_none());
    }

    #[test]
    fn unparseable_agreement_metadata_is_ignored() {
        let mut object = invoice(&AgreementId::new());
        object["subscription_details"] = json!({ "metadata": { "agreement_id": "not-a-uuid" } });

        let decoded = BillingEvent::decode(&envelope("invoice.paid", object)).unwrap();

        assert!(decoded.agreement_id().is_none());
        assert_eq!(decoded.subscription_id(), Some("sub_1"));
    }
}
