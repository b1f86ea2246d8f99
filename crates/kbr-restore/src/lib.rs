//! kbr-restore: restore orchestration over a parsed backup envelope
//!
//! Control flow per restore session:
//! ```text
//! parse (once) → build keyring (once) → per item: decrypt → reconcile → upsert
//! ```
//!
//! Partial-failure contract: one corrupt, locked, or inconsistent item is
//! recorded in the report and never stops the remaining items. Only a
//! structurally corrupt container aborts the whole restore.

pub mod engine;
pub mod reconcile;
pub mod report;
pub mod store;

pub use engine::{
    decode_outcomes, restore, restore_envelope, DecodeOutcome, RestoreError, RestoreOptions,
};
pub use reconcile::{classify, healed_metadata_key, Reconciliation};
pub use report::{HealRecord, ItemReport, ItemStatus, LockedClassReport, RestoreReport, Totals};
pub use store::{ItemId, ItemStore, MemoryStore, StoreError, StoredItem, UpsertOutcome};
