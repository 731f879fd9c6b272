//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine)
//! - `billing` - Agreement billing lifecycle and reconciliation rules

pub mod billing;
pub mod foundation;
