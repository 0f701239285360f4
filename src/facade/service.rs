use crate::core::{NewPrompt, Prompt, Result};
use crate::storage::PromptStore;
use async_trait::async_trait;
use std::path::PathBuf;

/// The record surface callers program against.
///
/// `PromptService` implements it over the local embedded store; a remote
/// backend client can implement the same trait and slot in unchanged.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records, most recently created first.
    async fn list_all(&self) -> Result<Vec<Prompt>>;

    /// Create one record from caller-supplied fields.
    async fn create(&self, fields: NewPrompt) -> Result<Prompt>;

    /// Overwrite the mutable fields of an existing record.
    async fn update(&self, record: Prompt) -> Result<Prompt>;

    /// Delete by identifier. Absent identifiers are a no-op.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Insert a batch atomically: all records or none.
    async fn bulk_import(&self, records: Vec<NewPrompt>) -> Result<()>;
}

/// Local record service: a pass-through over `PromptStore`. The column
/// mapping between the on-disk schema and the record shape is folded into
/// the store, so nothing is added here.
pub struct PromptService {
    store: PromptStore,
}

impl PromptService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { store: PromptStore::new(data_dir) }
    }

    pub fn with_store(store: PromptStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordStore for PromptService {
    async fn list_all(&self) -> Result<Vec<Prompt>> {
        self.store.list_all().await
    }

    async fn create(&self, fields: NewPrompt) -> Result<Prompt> {
        self.store.insert(fields).await
    }

    async fn update(&self, record: Prompt) -> Result<Prompt> {
        self.store.update(record).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }

    async fn bulk_import(&self, records: Vec<NewPrompt>) -> Result<()> {
        self.store.bulk_insert(records).await
    }
}
