//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `AgreementLedger` - Agreements and payment history with compare-and-swap
//! - `EventDeduplicator` - Processor event idempotency claims
//! - `DunningTaskStore` - Pending follow-ups for past-due agreements
//!
//! ## External Service Ports
//!
//! - `SubscriptionGateway` - Remote subscription operations
//! - `NotificationSink` - Tenant/landlord notification delivery

mod agreement_ledger;
mod dunning_store;
mod event_deduplicator;
mod notification_sink;
mod subscription_gateway;

pub use agreement_ledger::{AgreementLedger, CasOutcome};
pub use dunning_store::DunningTaskStore;
pub use event_deduplicator::{Admission, EventDeduplicator, EventOutcome, ProcessedEvent};
pub use notification_sink::{Notification, NotificationSink};
pub use subscription_gateway::{
    CancelAck, CancelMode, CreateSubscriptionRequest, CustomerProfile, GatewayError,
    GatewayErrorCode, GatewayOperation, IdempotencyKey, SubscriptionGateway,
};
