pub mod error;
pub mod record;

pub use error::{Result, VaultError};
pub use record::{LOCAL_USER_ID, NewPrompt, Prompt};
