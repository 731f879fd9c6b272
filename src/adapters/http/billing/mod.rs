//! HTTP adapter for billing endpoints.
//!
//! Exposes the billing application layer via REST API:
//! - `POST /agreements` - Create agreement and remote subscription
//! - `GET /agreements/:id` - Get agreement
//! - `GET /agreements/:id/payments` - Payment history
//! - `POST /agreements/:id/cancel` - Cancel agreement
//! - `POST /webhooks/processor` - Handle processor webhooks
//! - `GET /health` - Liveness check

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{BillingApiError, BillingAppState, SIGNATURE_HEADER};
pub use routes::{agreement_routes, billing_router, webhook_routes};
