//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Every agreement mutation goes through the `ReconciliationEngine`; the
//! handlers only decide which input to feed it.

mod agreement_locks;
pub mod dunning_scheduler;
pub mod errors;
pub mod gateway_retry;
pub mod handlers;
pub mod notifications;
pub mod reconciliation_engine;

pub use agreement_locks::AgreementLocks;
pub use dunning_scheduler::{
    DunningScheduler, DunningSchedulerConfig, GraceCheck, GraceExpiry, TickReport,
};
pub use errors::BillingError;
pub use gateway_retry::RetryPolicy;
pub use handlers::{
    CancelAgreementCommand, CancelAgreementHandler, CancelAgreementResult,
    CreateAgreementCommand, CreateAgreementHandler, CreateAgreementResult, GetAgreementHandler,
    GetAgreementQuery, HandleProcessorWebhookCommand, HandleProcessorWebhookHandler,
    WebhookDisposition,
};
pub use notifications::{notification_channel, NotificationDispatcher, NotificationQueue};
pub use reconciliation_engine::{ApplyOutcome, ReconciliationEngine};
