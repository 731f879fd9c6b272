//! Stripe subscription gateway adapter.
//!
//! Implements the `SubscriptionGateway` port for Stripe, covering:
//! - Customer lookup and creation
//! - Payment method attachment
//! - Subscription creation with a monthly price and billing anchor
//! - Immediate and end-of-period cancellation
//!
//! Webhook verification lives in the domain (`domain::billing`), since it
//! runs before any adapter is involved.
//!
//! # Configuration
//!
//! Read from `RENT_BILLING__PAYMENT__*` via `config::PaymentConfig`.

mod mock_gateway;
mod stripe_gateway;
mod wire_types;

pub use mock_gateway::{GatewayCall, MockSubscriptionGateway};
pub use stripe_gateway::{StripeConfig, StripeSubscriptionGateway};
pub use wire_types::{
    StripeCustomer, StripeErrorEnvelope, StripePaymentMethod, StripePrice, StripeSubscription,
};
