//! Application handlers.
//!
//! Command and query handlers that orchestrate domain operations.

mod cancel_agreement;
mod create_agreement;
mod get_agreement;
mod handle_processor_webhook;

pub use cancel_agreement::{CancelAgreementCommand, CancelAgreementHandler, CancelAgreementResult};
pub use create_agreement::{CreateAgreementCommand, CreateAgreementHandler, CreateAgreementResult};
pub use get_agreement::{GetAgreementHandler, GetAgreementQuery};
pub use handle_processor_webhook::{
    HandleProcessorWebhookCommand, HandleProcessorWebhookHandler, WebhookDisposition,
};
