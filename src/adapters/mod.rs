//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `http` - Axum routes for agreements and processor webhooks
//! - `memory` - In-process stores for development and tests
//! - `notifications` - Notification sinks (structured log, recording)
//! - `postgres` - PostgreSQL-backed stores
//! - `stripe` - Stripe subscription gateway and its test double

pub mod http;
pub mod memory;
pub mod notifications;
pub mod postgres;
pub mod stripe;
