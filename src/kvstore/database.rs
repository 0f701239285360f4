//! Versioned, file-backed key-value database with named object stores.
//!
//! Each database lives in its own directory under the caller's data root:
//! a `meta.json` document records the schema version and the object stores,
//! and every value is one file under `stores/<store>/`. All operations are
//! async; writes land via temp-file + rename so a reader never observes a
//! partially written value.

use crate::core::{Result, VaultError};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use super::transaction::{Transaction, TransactionMode};

const META_FILE: &str = "meta.json";
const STORES_DIR: &str = "stores";

/// How long an `open` waits between checks for an older connection to close.
const BLOCKED_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Open hooks
// ============================================================================

/// Schema-upgrade callback, invoked at most once per version increase,
/// before the open completes.
pub type UpgradeHook = Box<dyn FnOnce(&mut Upgrade<'_>) -> Result<()> + Send>;

/// Advisory lifecycle callback. These inform the caller; they never fail
/// an operation by themselves.
pub type LifecycleHook = Box<dyn Fn() + Send + Sync>;

/// Callbacks observed over the lifetime of one connection.
///
/// - `upgrade` runs during a version transition and is the only place
///   object stores can be created.
/// - `blocked` fires on the opener when an older-version connection to the
///   same database is still open.
/// - `blocking` fires on that older connection, asking it to close.
/// - `terminated` fires if the backing database is destroyed underneath a
///   live handle.
#[derive(Default)]
pub struct OpenHooks {
    pub upgrade: Option<UpgradeHook>,
    pub blocked: Option<LifecycleHook>,
    pub blocking: Option<LifecycleHook>,
    pub terminated: Option<LifecycleHook>,
}

// ============================================================================
// Metadata and upgrade handle
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMeta {
    version: u32,
    stores: Vec<String>,
}

/// Handle passed to the `upgrade` hook while a version transition is in
/// progress. Object stores can only be created here.
pub struct Upgrade<'a> {
    dir: &'a Path,
    meta: &'a mut StoreMeta,
}

impl Upgrade<'_> {
    /// Create an object store if it does not exist yet.
    pub fn create_object_store(&mut self, name: &str) -> Result<()> {
        if self.meta.stores.iter().any(|s| s == name) {
            return Ok(());
        }
        std::fs::create_dir_all(self.dir.join(STORES_DIR).join(name))
            .map_err(|e| VaultError::Storage(format!("Failed to create object store '{name}': {e}")))?;
        self.meta.stores.push(name.to_string());
        Ok(())
    }

    pub fn object_store_names(&self) -> &[String] {
        &self.meta.stores
    }
}

// ============================================================================
// In-process connection registry
// ============================================================================

// Backs the blocked/blocking handshake: an open at a newer version waits for
// every live older-version connection to the same database to close.
struct ConnEntry {
    id: u64,
    dir: PathBuf,
    version: u32,
    closed: Arc<AtomicBool>,
    blocking: Option<Arc<dyn Fn() + Send + Sync>>,
}

lazy_static! {
    static ref REGISTRY: StdMutex<Vec<ConnEntry>> = StdMutex::new(Vec::new());
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);
static TMP_SEQ: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Database handle
// ============================================================================

/// One open connection to a named key-value database.
///
/// Single-call helpers (`get`, `put`, `delete`, `clear`) each wrap a
/// short-lived one-store transaction; `transaction` opens an explicit one
/// spanning several stores. Dropping the handle closes the connection.
pub struct KvDatabase {
    dir: PathBuf,
    name: String,
    version: u32,
    stores: Vec<String>,
    conn_id: u64,
    closed: Arc<AtomicBool>,
    terminated: Option<LifecycleHook>,
    terminated_fired: AtomicBool,
}

impl std::fmt::Debug for KvDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvDatabase")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl KvDatabase {
    /// Open (creating or upgrading if needed) the database `name` under
    /// `root`.
    ///
    /// If the stored version is lower than `version` (or the database does
    /// not exist yet), `hooks.upgrade` runs before the open completes and the
    /// new version is recorded. Requesting a version lower than the stored
    /// one is an error.
    pub async fn open(
        root: impl AsRef<Path>,
        name: &str,
        version: u32,
        mut hooks: OpenHooks,
    ) -> Result<Self> {
        let dir = root.as_ref().join(name);

        wait_for_older_connections(&dir, version, hooks.blocked.take()).await?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to create database directory: {e}")))?;

        let meta_path = dir.join(META_FILE);
        let existing = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => Some(
                serde_json::from_slice::<StoreMeta>(&bytes)
                    .map_err(|e| VaultError::Serialization(format!("Malformed metadata for '{name}': {e}")))?,
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(VaultError::Storage(format!("Failed to read metadata for '{name}': {e}")));
            }
        };

        let meta = match existing {
            Some(meta) if meta.version > version => {
                return Err(VaultError::VersionMismatch { requested: version, stored: meta.version });
            }
            Some(meta) if meta.version == version => meta,
            older => {
                let mut meta = older.unwrap_or(StoreMeta { version: 0, stores: Vec::new() });
                let from = meta.version;
                if let Some(upgrade) = hooks.upgrade.take() {
                    let mut handle = Upgrade { dir: &dir, meta: &mut meta };
                    upgrade(&mut handle)?;
                }
                meta.version = version;
                write_meta(&dir, &meta_path, &meta).await?;
                tracing::info!(database = name, from, to = version, "upgraded key-value database");
                meta
            }
        };

        let closed = Arc::new(AtomicBool::new(false));
        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        REGISTRY.lock()?.push(ConnEntry {
            id: conn_id,
            dir: dir.clone(),
            version,
            closed: closed.clone(),
            blocking: hooks.blocking.take().map(Arc::from),
        });

        Ok(Self {
            dir,
            name: name.to_string(),
            version,
            stores: meta.stores,
            conn_id,
            closed,
            terminated: hooks.terminated.take(),
            terminated_fired: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn object_store_names(&self) -> &[String] {
        &self.stores
    }

    /// Open an explicit transaction over the named stores.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> Result<Transaction<'_>> {
        if stores.is_empty() {
            return Err(VaultError::Storage(
                "Transaction requires at least one object store".to_string(),
            ));
        }
        for store in stores {
            if !self.stores.iter().any(|s| s == store) {
                return Err(VaultError::StoreNotFound((*store).to_string()));
            }
        }
        Ok(Transaction::new(self, stores, mode))
    }

    /// Read one value through a short-lived read-only transaction.
    pub async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let tx = self.transaction(&[store], TransactionMode::ReadOnly)?;
        let value = tx.get(key).await?;
        tx.commit().await?;
        Ok(value)
    }

    /// Write one value through a short-lived read-write transaction.
    pub async fn put(&self, store: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadWrite)?;
        tx.put(key, value)?;
        tx.commit().await
    }

    /// Delete one key through a short-lived read-write transaction.
    /// Deleting an absent key is a no-op.
    pub async fn delete(&self, store: &str, key: &str) -> Result<()> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadWrite)?;
        tx.delete(key)?;
        tx.commit().await
    }

    /// Remove every value in one store.
    pub async fn clear(&self, store: &str) -> Result<()> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadWrite)?;
        tx.clear()?;
        tx.commit().await
    }

    /// Close the connection and release its registry slot. Idempotent;
    /// also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut registry) = REGISTRY.lock() {
            registry.retain(|entry| entry.id != self.conn_id);
        }
        tracing::debug!(database = %self.name, "closed key-value database");
    }

    /// Fail fast if the connection is closed or the backing database was
    /// destroyed underneath us (firing the `terminated` hook once).
    pub(crate) async fn ensure_live(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VaultError::Storage(format!("Database '{}' is closed", self.name)));
        }
        match tokio::fs::try_exists(self.dir.join(META_FILE)).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.terminate();
                Err(VaultError::Storage(format!("Database '{}' was terminated", self.name)))
            }
            Err(e) => Err(VaultError::Storage(format!("Failed to check database '{}': {e}", self.name))),
        }
    }

    fn terminate(&self) {
        if !self.terminated_fired.swap(true, Ordering::AcqRel) {
            tracing::warn!(database = %self.name, "key-value database terminated unexpectedly");
            if let Some(hook) = &self.terminated {
                hook();
            }
        }
        self.close();
    }

    pub(crate) fn store_dir(&self, store: &str) -> PathBuf {
        self.dir.join(STORES_DIR).join(store)
    }

    pub(crate) fn value_path(&self, store: &str, key: &str) -> PathBuf {
        self.store_dir(store).join(format!("{}.val", encode_key(key)))
    }

    /// Replace the value file atomically: write a uniquely named temp file in
    /// the same directory, then rename over the destination.
    pub(crate) async fn write_value(&self, store: &str, key: &str, value: &[u8]) -> Result<()> {
        let path = self.value_path(store, key);
        let tmp = path.with_extension(format!("tmp{}", TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to write '{key}' in '{store}': {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to commit '{key}' in '{store}': {e}")))?;
        Ok(())
    }

    pub(crate) async fn remove_value(&self, store: &str, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.value_path(store, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Storage(format!("Failed to delete '{key}' in '{store}': {e}"))),
        }
    }

    pub(crate) async fn clear_store(&self, store: &str) -> Result<()> {
        let dir = self.store_dir(store);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to list store '{store}': {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to list store '{store}': {e}")))?
        {
            tokio::fs::remove_file(entry.path())
                .await
                .map_err(|e| VaultError::Storage(format!("Failed to clear store '{store}': {e}")))?;
        }
        Ok(())
    }
}

impl Drop for KvDatabase {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Block the open while any live in-process connection to the same database
/// holds an older version. Fires the holders' `blocking` hooks and the
/// opener's `blocked` hook once, then polls until the holders close.
async fn wait_for_older_connections(
    dir: &Path,
    version: u32,
    blocked: Option<LifecycleHook>,
) -> Result<()> {
    let mut blocked = blocked;
    let mut announced = false;
    loop {
        let holders: Vec<Option<Arc<dyn Fn() + Send + Sync>>> = {
            let mut registry = REGISTRY.lock()?;
            registry.retain(|entry| !entry.closed.load(Ordering::Acquire));
            registry
                .iter()
                .filter(|entry| entry.dir == dir && entry.version < version)
                .map(|entry| entry.blocking.clone())
                .collect()
        };
        if holders.is_empty() {
            return Ok(());
        }
        if !announced {
            tracing::debug!(
                path = %dir.display(),
                holders = holders.len(),
                "open blocked by older-version connections"
            );
            for hook in holders.iter().flatten() {
                hook();
            }
            if let Some(hook) = blocked.take() {
                hook();
            }
            announced = true;
        }
        tokio::time::sleep(BLOCKED_POLL_INTERVAL).await;
    }
}

async fn write_meta(dir: &Path, meta_path: &Path, meta: &StoreMeta) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(meta)
        .map_err(|e| VaultError::Serialization(format!("Failed to serialize metadata: {e}")))?;
    let tmp = dir.join(format!("{META_FILE}.tmp"));
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to write metadata: {e}")))?;
    tokio::fs::rename(&tmp, meta_path)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to commit metadata: {e}")))?;
    Ok(())
}

/// Filename-safe, injective key encoding. Bytes outside a conservative
/// alphabet become `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::encode_key;

    #[test]
    fn encode_key_keeps_safe_bytes() {
        assert_eq!(encode_key("prompt_vault_db_file"), "prompt_vault_db_file");
    }

    #[test]
    fn encode_key_escapes_separators() {
        assert_eq!(encode_key("a/b.c"), "a%2Fb%2Ec");
        assert_ne!(encode_key("a/b"), encode_key("a%2Fb"));
    }
}
