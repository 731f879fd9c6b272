//! In-memory adapters for development and tests.

mod agreement_ledger;
mod dunning_store;
mod event_deduplicator;

pub use agreement_ledger::InMemoryAgreementLedger;
pub use dunning_store::InMemoryDunningStore;
pub use event_deduplicator::InMemoryEventDeduplicator;
