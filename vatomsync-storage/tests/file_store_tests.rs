use pretty_assertions::assert_eq;
use serde_json::json;
use vatomsync_storage::{FileCacheStore, LocalPersistence, safe_key};
use vatomsync_types::DataObject;

fn objects() -> Vec<DataObject> {
    vec![
        DataObject::new("v1", "vatom", json!({ "title": "One" })),
        DataObject::new("v2", "vatom", json!({ "title": "Two" })),
        DataObject::unloaded("v3", "vatom"),
    ]
}

#[tokio::test]
async fn save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());

    store.save("inventory:user-1", &objects()).await.unwrap();
    let loaded = store.load("inventory:user-1").await.unwrap().unwrap();

    assert_eq!(loaded, objects());
}

#[tokio::test]
async fn load_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());
    assert!(store.load("nothing-here").await.unwrap().is_none());
}

#[tokio::test]
async fn save_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let store = FileCacheStore::new(&nested);

    store.save("k", &objects()).await.unwrap();

    assert!(store.path_for("k").exists());
    assert_eq!(store.dir(), nested.as_path());
}

#[tokio::test]
async fn save_overwrites_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());

    store.save("k", &objects()).await.unwrap();
    store.save("k", &objects()[..1]).await.unwrap();

    let loaded = store.load("k").await.unwrap().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "v1");
    assert!(!store.path_for("k").with_extension("json.tmp").exists());
}

#[tokio::test]
async fn keys_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());

    store.save("inventory:a", &objects()).await.unwrap();
    store.save("inventory/a", &objects()[..1]).await.unwrap();

    assert_eq!(store.load("inventory:a").await.unwrap().unwrap().len(), 3);
    assert_eq!(store.load("inventory/a").await.unwrap().unwrap().len(), 1);
}

#[tokio::test]
async fn remove_deletes_and_tolerates_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());

    store.save("k", &objects()).await.unwrap();
    store.remove("k").await.unwrap();
    assert!(store.load("k").await.unwrap().is_none());
    store.remove("k").await.unwrap();
}

#[tokio::test]
async fn corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());
    std::fs::write(store.path_for("k"), b"{not json").unwrap();
    assert!(store.load("k").await.is_err());
}

#[tokio::test]
async fn old_version_reads_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path());
    let stale = json!({ "version": 0, "key": "k", "objects": [] });
    std::fs::write(store.path_for("k"), serde_json::to_vec(&stale).unwrap()).unwrap();
    assert!(store.load("k").await.unwrap().is_none());
}

// ── safe_key ──────────────────────────────────────────────────────

#[test]
fn safe_key_is_filesystem_safe() {
    let key = safe_key("inventory:user/1 ☃");
    assert!(
        key.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    );
    assert!(key.starts_with("inventory_user_1__"));
}

#[test]
fn safe_key_distinguishes_replaced_characters() {
    assert_ne!(safe_key("a:b"), safe_key("a/b"));
    assert_eq!(safe_key("a:b"), safe_key("a:b"));
}

#[test]
fn safe_key_bounds_length() {
    let long = "x".repeat(500);
    assert!(safe_key(&long).len() <= 48 + 1 + 16);
}
