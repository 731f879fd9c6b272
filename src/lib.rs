//! Rent Billing - rental agreement billing reconciliation
//!
//! Keeps each rental agreement's billing state consistent with the
//! subscription payment processor. Processor webhooks arrive unordered and
//! possibly duplicated; they are verified, deduplicated and folded into a
//! per-agreement ledger through version-guarded writes. Agreements that
//! fall past due get a grace window of reminders before suspension.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod startup;
