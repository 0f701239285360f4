//! Async key-value store adapter.
//!
//! Presents an event-free, awaitable surface over a per-application object
//! store: named databases with versioned schemas, named object stores of
//! opaque byte values, implicit short-lived transactions for single calls
//! and explicit staged transactions for multi-call work.

mod database;
mod transaction;

pub use database::{KvDatabase, LifecycleHook, OpenHooks, Upgrade, UpgradeHook};
pub use transaction::{StoreHandle, Transaction, TransactionMode};
