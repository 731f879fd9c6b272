//! Billing domain module.
//!
//! Agreement billing lifecycle, processor events and the pure
//! reconciliation rules that tie them together.
//!
//! # Module Structure
//!
//! - `agreement` - Agreement aggregate and billing terms
//! - `status` - AgreementStatus state machine
//! - `payment` - Payment records and invoice ordering
//! - `billing_event` - Processor envelope and decoded billing events
//! - `webhook_verifier` - Signature verification
//! - `reconciliation` - `(agreement, input) -> decision`
//! - `dunning` - Reminder cadence for past-due agreements

mod agreement;
mod billing_event;
mod dunning;
mod effects;
mod payment;
mod reconciliation;
mod status;
mod webhook_errors;
mod webhook_verifier;

pub use agreement::{
    next_billing_anchor, Agreement, BillingTerms, SubscriptionMatch, SubscriptionRef,
};
pub use billing_event::{
    BillingEvent, DecodeError, InvoiceFact, ProcessorEvent, ProcessorEventData,
    ProcessorEventType, SubscriptionFact, AGREEMENT_METADATA_KEY,
};
pub use dunning::{DunningPolicy, DunningTask};
pub use effects::{Effect, NotificationKind};
pub use payment::{InvoiceMarker, Payment, PaymentKey, PaymentOutcome};
pub use reconciliation::{reconcile, Decision, DecisionOutcome, ReconcileInput, ReconcilePolicy};
pub use status::AgreementStatus;
pub use webhook_errors::WebhookError;
pub use webhook_verifier::{
    sign_payload, verify, SignatureHeader, StripeWebhookVerifier, Verification,
    DEFAULT_CLOCK_SKEW_SECS, DEFAULT_TOLERANCE_SECS,
};
