// ============================================================================
// promptvault — local persistence core for a prompt vault
// ============================================================================
//
// Control flow: facade → prompt store → (in-memory SQLite engine; async
// key-value store). The engine's entire serialized image is the durable
// artifact: it is restored once on first use and re-exported whole after
// every successful mutation.

pub mod core;
pub mod exchange;
pub mod facade;
pub mod kvstore;
pub mod storage;

// Re-export main types for convenience
pub use core::{LOCAL_USER_ID, NewPrompt, Prompt, Result, VaultError};
pub use facade::{PromptService, RecordStore};
pub use kvstore::{KvDatabase, OpenHooks, Transaction, TransactionMode};
pub use storage::PromptStore;
