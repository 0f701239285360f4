//! Explicit transactions over the key-value database.
//!
//! Writes are staged in memory in call order and applied on `commit`, each
//! key landing through an atomic file replacement. Reads observe the staged
//! writes of their own transaction. Aborting (or dropping the transaction)
//! discards everything staged.

use crate::core::{Result, VaultError};
use std::io::ErrorKind;

use super::database::KvDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

enum StagedOp {
    Put { store: String, key: String, value: Vec<u8> },
    Delete { store: String, key: String },
    Clear { store: String },
}

/// One explicit transaction.
///
/// A transaction spanning exactly one store exposes `get`/`put`/`delete`/
/// `clear` directly; a multi-store transaction goes through `store(name)`
/// handles.
pub struct Transaction<'db> {
    db: &'db KvDatabase,
    stores: Vec<String>,
    mode: TransactionMode,
    ops: Vec<StagedOp>,
    finished: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db KvDatabase, stores: &[&str], mode: TransactionMode) -> Self {
        Self {
            db,
            stores: stores.iter().map(|s| (*s).to_string()).collect(),
            mode,
            ops: Vec::new(),
            finished: false,
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn store_names(&self) -> &[String] {
        &self.stores
    }

    /// Handle for one member store of a multi-store transaction.
    pub fn store<'t>(&'t mut self, name: &str) -> Result<StoreHandle<'t, 'db>> {
        if !self.stores.iter().any(|s| s == name) {
            return Err(VaultError::StoreNotFound(name.to_string()));
        }
        let store = name.to_string();
        Ok(StoreHandle { tx: self, store })
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.sole_store()?.to_string();
        self.read(&store, key).await
    }

    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let store = self.sole_store()?.to_string();
        self.stage_put(store, key, value)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        let store = self.sole_store()?.to_string();
        self.stage_delete(store, key)
    }

    pub fn clear(&mut self) -> Result<()> {
        let store = self.sole_store()?.to_string();
        self.stage_clear(store)
    }

    /// Apply every staged write in order. Consumes the transaction; this is
    /// the completion point a caller awaits.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.db.ensure_live().await?;
        let ops = std::mem::take(&mut self.ops);
        for op in ops {
            match op {
                StagedOp::Put { store, key, value } => {
                    self.db.write_value(&store, &key, &value).await?;
                }
                StagedOp::Delete { store, key } => {
                    self.db.remove_value(&store, &key).await?;
                }
                StagedOp::Clear { store } => {
                    self.db.clear_store(&store).await?;
                }
            }
        }
        Ok(())
    }

    /// Discard every staged write.
    pub fn abort(mut self) {
        self.finished = true;
        self.ops.clear();
    }

    fn sole_store(&self) -> Result<&str> {
        match self.stores.as_slice() {
            [only] => Ok(only),
            _ => Err(VaultError::AmbiguousStore(self.stores.len())),
        }
    }

    fn check_writable(&self) -> Result<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(VaultError::ReadOnly(
                "mutation attempted in a read-only transaction".to_string(),
            )),
        }
    }

    pub(crate) async fn read(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.db.ensure_live().await?;
        // Latest staged op for this key wins over the durable value.
        for op in self.ops.iter().rev() {
            match op {
                StagedOp::Put { store: s, key: k, value } if s == store && k == key => {
                    return Ok(Some(value.clone()));
                }
                StagedOp::Delete { store: s, key: k } if s == store && k == key => {
                    return Ok(None);
                }
                StagedOp::Clear { store: s } if s == store => return Ok(None),
                _ => {}
            }
        }
        match tokio::fs::read(self.db.value_path(store, key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::Storage(format!("Failed to read '{key}' from '{store}': {e}"))),
        }
    }

    pub(crate) fn stage_put(&mut self, store: String, key: &str, value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.ops.push(StagedOp::Put { store, key: key.to_string(), value: value.to_vec() });
        Ok(())
    }

    pub(crate) fn stage_delete(&mut self, store: String, key: &str) -> Result<()> {
        self.check_writable()?;
        self.ops.push(StagedOp::Delete { store, key: key.to_string() });
        Ok(())
    }

    pub(crate) fn stage_clear(&mut self, store: String) -> Result<()> {
        self.check_writable()?;
        self.ops.push(StagedOp::Clear { store });
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.ops.is_empty() {
            tracing::debug!(staged = self.ops.len(), "transaction dropped without commit, staged writes discarded");
        }
    }
}

/// Per-store view into a multi-store transaction.
pub struct StoreHandle<'t, 'db> {
    tx: &'t mut Transaction<'db>,
    store: String,
}

impl StoreHandle<'_, '_> {
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.tx.read(&self.store, key).await
    }

    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let store = self.store.clone();
        self.tx.stage_put(store, key, value)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        let store = self.store.clone();
        self.tx.stage_delete(store, key)
    }

    pub fn clear(&mut self) -> Result<()> {
        let store = self.store.clone();
        self.tx.stage_clear(store)
    }
}
