//! Record service facade, the only entry point surrounding layers use.

mod service;

pub use service::{PromptService, RecordStore};
