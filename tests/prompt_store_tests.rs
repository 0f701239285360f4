//! Behavior tests for the relational-file adapter.

use chrono::{DateTime, TimeZone, Utc};
use promptvault::{LOCAL_USER_ID, NewPrompt, PromptStore, VaultError};
use std::time::Duration;
use tempfile::TempDir;

fn sample(title: &str) -> NewPrompt {
    NewPrompt {
        title: title.to_string(),
        text: "body text".to_string(),
        image_url: None,
    }
}

fn at_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

#[tokio::test]
async fn test_create_then_list_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    let created = store
        .insert(NewPrompt {
            title: "Greeting".to_string(),
            text: "Say hello".to_string(),
            image_url: Some("https://example.com/cat.png".to_string()),
        })
        .await
        .unwrap();

    let prompts = store.list_all().await.unwrap();
    assert_eq!(prompts.len(), 1);

    let prompt = &prompts[0];
    assert_eq!(prompt.title, "Greeting");
    assert_eq!(prompt.text, "Say hello");
    assert_eq!(prompt.image_url.as_deref(), Some("https://example.com/cat.png"));
    assert_eq!(prompt.user_id, LOCAL_USER_ID);
    assert_eq!(prompt.id, created.id);
    assert!(!prompt.id.is_empty());

    let stamp = DateTime::parse_from_rfc3339(&prompt.created_at).unwrap();
    assert!(stamp.with_timezone(&Utc) <= Utc::now());
}

#[tokio::test]
async fn test_list_on_fresh_store_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_removes_record() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    let created = store.insert(sample("doomed")).await.unwrap();
    store.delete(&created.id).await.unwrap();

    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_missing_id_is_noop() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    store.insert(sample("kept")).await.unwrap();
    store.delete("does-not-exist").await.unwrap();

    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_preserves_identity_fields() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    let created = store.insert(sample("original")).await.unwrap();

    let mut edited = created.clone();
    edited.title = "edited".to_string();
    let returned = store.update(edited.clone()).await.unwrap();
    assert_eq!(returned, edited);

    let prompts = store.list_all().await.unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].id, created.id);
    assert_eq!(prompts[0].created_at, created.created_at);
    assert_eq!(prompts[0].title, "edited");
    assert_eq!(prompts[0].text, created.text);
}

#[tokio::test]
async fn test_update_missing_id_returns_record_as_given() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    let mut ghost = store.insert(sample("real")).await.unwrap();
    store.delete(&ghost.id).await.unwrap();

    ghost.title = "still edited".to_string();
    let returned = store.update(ghost.clone()).await.unwrap();
    assert_eq!(returned, ghost);
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_orders_most_recent_first() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    store.insert(sample("first")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.insert(sample("second")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.insert(sample("third")).await.unwrap();

    let prompts = store.list_all().await.unwrap();
    let titles: Vec<&str> = prompts.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_persistence_survives_reload() {
    let dir = TempDir::new().unwrap();
    let created = {
        let store = PromptStore::new(dir.path());
        store.insert(sample("durable")).await.unwrap()
    };

    // A fresh instance re-initializes from the stored image.
    let reloaded = PromptStore::new(dir.path());
    let prompts = reloaded.list_all().await.unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].id, created.id);
    assert_eq!(prompts[0].title, "durable");
}

#[tokio::test]
async fn test_image_url_round_trips_null() {
    let dir = TempDir::new().unwrap();
    let store = PromptStore::new(dir.path());

    store.insert(sample("no image")).await.unwrap();
    let prompts = store.list_all().await.unwrap();
    assert_eq!(prompts[0].image_url, None);
}

#[tokio::test]
async fn test_bulk_insert_ids_unique_within_one_millisecond() {
    let dir = TempDir::new().unwrap();
    // A frozen clock makes the whole batch land in the same millisecond.
    let store = PromptStore::with_clock(dir.path(), || at_millis(1_700_000_000_000));

    let batch: Vec<NewPrompt> = (0..8).map(|i| sample(&format!("bulk-{i}"))).collect();
    store.bulk_insert(batch).await.unwrap();

    let prompts = store.list_all().await.unwrap();
    assert_eq!(prompts.len(), 8);

    let mut ids: Vec<&str> = prompts.iter().map(|p| p.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn test_bulk_insert_rolls_back_whole_batch_on_mid_batch_failure() {
    let dir = TempDir::new().unwrap();
    let base = 1_700_000_000_000_i64;

    // Seed one record whose id will collide with the second batch item.
    {
        let store = PromptStore::with_clock(dir.path(), move || at_millis(base));
        store.insert(sample("existing")).await.unwrap();
    }

    let store = PromptStore::with_clock(dir.path(), move || at_millis(base - 1));
    let batch: Vec<NewPrompt> = (0..3).map(|i| sample(&format!("bulk-{i}"))).collect();

    // Item 1 gets id `base` and violates the primary key.
    let err = store.bulk_insert(batch).await.unwrap_err();
    assert!(matches!(err, VaultError::Engine(_)));

    let prompts = store.list_all().await.unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].title, "existing");
}

#[tokio::test]
async fn test_bulk_insert_atomicity_holds_across_reload() {
    let dir = TempDir::new().unwrap();
    let base = 1_700_000_000_000_i64;

    {
        let store = PromptStore::with_clock(dir.path(), move || at_millis(base));
        store.insert(sample("existing")).await.unwrap();
    }
    {
        let store = PromptStore::with_clock(dir.path(), move || at_millis(base - 1));
        let batch: Vec<NewPrompt> = (0..3).map(|i| sample(&format!("bulk-{i}"))).collect();
        store.bulk_insert(batch).await.unwrap_err();
    }

    // Nothing from the failed batch reached the durable image.
    let store = PromptStore::new(dir.path());
    let prompts = store.list_all().await.unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].title, "existing");
}

#[tokio::test]
async fn test_bulk_insert_persists_after_commit() {
    let dir = TempDir::new().unwrap();
    {
        let store = PromptStore::new(dir.path());
        let batch: Vec<NewPrompt> = (0..3).map(|i| sample(&format!("bulk-{i}"))).collect();
        store.bulk_insert(batch).await.unwrap();
    }

    let reloaded = PromptStore::new(dir.path());
    assert_eq!(reloaded.list_all().await.unwrap().len(), 3);
}
