//! Durable storage for prompt records.

mod prompt_store;

pub use prompt_store::{DB_KEY, DB_NAME, DB_VERSION, PromptStore, STORE_NAME};
