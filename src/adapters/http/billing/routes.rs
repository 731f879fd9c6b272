//! Axum router configuration for billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    cancel_agreement, create_agreement, get_agreement, handle_processor_webhook, health,
    list_payments, BillingAppState,
};

/// Agreement command and query routes.
///
/// # Routes
/// - `POST /` - Create agreement
/// - `GET /:id` - Get agreement
/// - `GET /:id/payments` - Payment history
/// - `POST /:id/cancel` - Cancel agreement
pub fn agreement_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/", post(create_agreement))
        .route("/:id", get(get_agreement))
        .route("/:id/payments", get(list_payments))
        .route("/:id/cancel", post(cancel_agreement))
}

/// Processor webhook routes.
///
/// Separate from the agreement routes because they are authenticated by
/// signature, not by caller identity.
///
/// # Routes
/// - `POST /processor` - Handle processor webhooks
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/processor", post(handle_processor_webhook))
}

/// Complete billing router.
///
/// ```ignore
/// let app = billing_router().with_state(state);
/// ```
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/agreements", agreement_routes())
        .nest("/webhooks", webhook_routes())
}
