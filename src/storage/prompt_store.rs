//! Relational-file adapter: one in-memory SQLite engine whose entire
//! database image is the durable artifact.
//!
//! The image lives under a single fixed key in the key-value store. It is
//! loaded (or bootstrapped) on first use, mutated in memory by every record
//! operation, and re-exported and rewritten whole after each successful
//! mutation. One async mutex serializes initialize-mutate-persist per call,
//! so concurrent callers cannot overwrite each other's durable image.

use crate::core::{LOCAL_USER_ID, NewPrompt, Prompt, Result, VaultError};
use crate::kvstore::{KvDatabase, OpenHooks};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, DatabaseName, params};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, MutexGuard};

/// Fixed logical names of the persisted image. These form the compatibility
/// contract with any previously stored image and must not change.
pub const DB_NAME: &str = "PromptVaultSQLiteDB";
pub const DB_VERSION: u32 = 1;
pub const STORE_NAME: &str = "sqlite_db_store";
pub const DB_KEY: &str = "prompt_vault_db_file";

// On-disk schema. Column names differ from the record shape on purpose
// (`image` vs `image_url`, `createdAt` vs `created_at`); the mapping happens
// at the row boundary below.
const CREATE_TABLE_SQL: &str = "\
CREATE TABLE prompts (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    text TEXT NOT NULL,
    image TEXT,
    createdAt TEXT NOT NULL
);";

const SELECT_ALL_SQL: &str =
    "SELECT id, title, text, image, createdAt FROM prompts ORDER BY createdAt DESC";
const INSERT_SQL: &str =
    "INSERT INTO prompts (id, title, text, image, createdAt) VALUES (?1, ?2, ?3, ?4, ?5)";
const UPDATE_SQL: &str = "UPDATE prompts SET title = ?1, text = ?2, image = ?3 WHERE id = ?4";
const DELETE_SQL: &str = "DELETE FROM prompts WHERE id = ?1";

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Engine lifecycle: `Uninitialized` until the first operation, then `Ready`
/// for the rest of the process lifetime. The loading transition happens
/// inside one lock acquisition, so at most one caller ever initializes.
enum StoreState {
    Uninitialized,
    Ready { engine: Connection, kv: KvDatabase },
}

impl StoreState {
    fn parts(&mut self) -> Result<(&mut Connection, &KvDatabase)> {
        match self {
            StoreState::Ready { engine, kv } => Ok((engine, kv)),
            StoreState::Uninitialized => {
                Err(VaultError::Storage("Prompt store is not initialized".to_string()))
            }
        }
    }
}

/// The one engine instance over the persisted prompt database.
pub struct PromptStore {
    data_dir: PathBuf,
    clock: Clock,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for PromptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptStore")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl PromptStore {
    /// Create a store over `data_dir`. Nothing is opened until the first
    /// operation.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(data_dir, Utc::now)
    }

    /// Create a store with an injected clock. Identifiers and creation
    /// timestamps are derived from it.
    pub fn with_clock(
        data_dir: impl Into<PathBuf>,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            clock: Box::new(clock),
            state: Mutex::new(StoreState::Uninitialized),
        }
    }

    /// All records, most recently created first.
    pub async fn list_all(&self) -> Result<Vec<Prompt>> {
        let mut state = self.lock_ready().await?;
        let (engine, _) = state.parts()?;
        let mut stmt = engine.prepare(SELECT_ALL_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(Prompt {
                id: row.get(0)?,
                title: row.get(1)?,
                text: row.get(2)?,
                image_url: row.get(3)?,
                user_id: LOCAL_USER_ID.to_string(),
                created_at: row.get(4)?,
            })
        })?;
        let mut prompts = Vec::new();
        for row in rows {
            prompts.push(row?);
        }
        Ok(prompts)
    }

    /// Stamp identity fields onto `fields`, insert the row, persist the
    /// image, and return the constructed record.
    pub async fn insert(&self, fields: NewPrompt) -> Result<Prompt> {
        let mut state = self.lock_ready().await?;
        let (engine, kv) = state.parts()?;
        let now = (self.clock)();
        let prompt = Prompt {
            id: now.timestamp_millis().to_string(),
            title: fields.title,
            text: fields.text,
            image_url: fields.image_url,
            user_id: LOCAL_USER_ID.to_string(),
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        engine.execute(
            INSERT_SQL,
            params![prompt.id, prompt.title, prompt.text, prompt.image_url, prompt.created_at],
        )?;
        persist(engine, kv).await?;
        tracing::debug!(id = %prompt.id, "inserted prompt");
        Ok(prompt)
    }

    /// Overwrite title/text/image of the row matching `prompt.id`; identity
    /// fields are immutable. Returns the record as given without verifying a
    /// row matched.
    pub async fn update(&self, prompt: Prompt) -> Result<Prompt> {
        let mut state = self.lock_ready().await?;
        let (engine, kv) = state.parts()?;
        engine.execute(
            UPDATE_SQL,
            params![prompt.title, prompt.text, prompt.image_url, prompt.id],
        )?;
        persist(engine, kv).await?;
        tracing::debug!(id = %prompt.id, "updated prompt");
        Ok(prompt)
    }

    /// Delete the row matching `id`. Deleting an absent id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.lock_ready().await?;
        let (engine, kv) = state.parts()?;
        engine.execute(DELETE_SQL, params![id])?;
        persist(engine, kv).await?;
        tracing::debug!(id = %id, "deleted prompt");
        Ok(())
    }

    /// Insert a whole batch inside one engine transaction.
    ///
    /// Item identifiers offset the base timestamp by the item's position, so
    /// a batch completing within one millisecond still gets distinct ids.
    /// A mid-batch failure rolls the engine back before anything is
    /// persisted; the durable image reflects the full batch or none of it.
    pub async fn bulk_insert(&self, records: Vec<NewPrompt>) -> Result<()> {
        let mut state = self.lock_ready().await?;
        let (engine, kv) = state.parts()?;
        let now = (self.clock)();
        let base_millis = now.timestamp_millis();
        let created_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let count = records.len();
        {
            // Rolls back on drop if any insert below fails.
            let tx = engine.transaction()?;
            {
                let mut stmt = tx.prepare(INSERT_SQL)?;
                for (index, record) in records.iter().enumerate() {
                    let id = (base_millis + index as i64).to_string();
                    stmt.execute(params![id, record.title, record.text, record.image_url, created_at])?;
                }
            }
            tx.commit()?;
        }
        persist(engine, kv).await?;
        tracing::debug!(count, "bulk-inserted prompts");
        Ok(())
    }

    /// Lock the state, initializing it first if this is the first operation.
    async fn lock_ready(&self) -> Result<MutexGuard<'_, StoreState>> {
        let mut state = self.state.lock().await;
        if matches!(*state, StoreState::Uninitialized) {
            *state = self.initialize().await?;
        }
        Ok(state)
    }

    /// Open the key-value store, fetch the stored image and construct the
    /// engine from it, or bootstrap an empty schema and persist it right
    /// away. Runs at most once per store instance.
    async fn initialize(&self) -> Result<StoreState> {
        let kv = KvDatabase::open(
            &self.data_dir,
            DB_NAME,
            DB_VERSION,
            OpenHooks {
                upgrade: Some(Box::new(|upgrade| upgrade.create_object_store(STORE_NAME))),
                ..OpenHooks::default()
            },
        )
        .await?;

        let engine = match kv.get(STORE_NAME, DB_KEY).await? {
            Some(image) => {
                let engine = load_image(&image)?;
                tracing::info!(bytes = image.len(), "restored prompt database image");
                engine
            }
            None => {
                let mut engine = Connection::open_in_memory()?;
                engine.execute_batch(CREATE_TABLE_SQL)?;
                persist(&mut engine, &kv).await?;
                tracing::info!("bootstrapped empty prompt database");
                engine
            }
        };

        Ok(StoreState::Ready { engine, kv })
    }
}

// ============================================================================
// Image export / restore
// ============================================================================

/// Export the engine's full image and overwrite the stored one.
async fn persist(engine: &mut Connection, kv: &KvDatabase) -> Result<()> {
    let image = export_image(engine)?;
    kv.put(STORE_NAME, DB_KEY, &image).await?;
    tracing::debug!(bytes = image.len(), "persisted prompt database image");
    Ok(())
}

/// Serialize the whole in-memory database through a spool file.
fn export_image(engine: &Connection) -> Result<Vec<u8>> {
    let spool = spool_file()?;
    engine.backup(DatabaseName::Main, spool.path(), None)?;
    std::fs::read(spool.path())
        .map_err(|e| VaultError::Storage(format!("Failed to read exported image: {e}")))
}

/// Reconstruct an in-memory engine from stored image bytes.
fn load_image(image: &[u8]) -> Result<Connection> {
    let spool = spool_file()?;
    std::fs::write(spool.path(), image)
        .map_err(|e| VaultError::Storage(format!("Failed to spool stored image: {e}")))?;
    let mut engine = Connection::open_in_memory()?;
    engine.restore(DatabaseName::Main, spool.path(), None::<fn(rusqlite::backup::Progress)>)?;
    Ok(engine)
}

fn spool_file() -> Result<NamedTempFile> {
    NamedTempFile::new().map_err(|e| VaultError::Storage(format!("Failed to create spool file: {e}")))
}
