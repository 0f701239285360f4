use serde::{Deserialize, Serialize};

/// Owner identifier stamped on every record served by the local backend.
/// The on-disk schema has no owner column; this sentinel is injected on read.
pub const LOCAL_USER_ID: &str = "local-user";

/// One prompt record as exchanged with callers.
///
/// `id` is an epoch-millisecond timestamp stringified at creation time and
/// `created_at` an ISO-8601 stamp; both are set once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub text: String,
    pub image_url: Option<String>,
    pub user_id: String,
    pub created_at: String,
}

/// The caller-supplied part of a record, before identity fields are stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrompt {
    pub title: String,
    pub text: String,
    pub image_url: Option<String>,
}
