mod common;

use common::{InventoryPlugin, LoadScript, init_tracing, record, vatom};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use vatomsync_storage::{LocalPersistence, MemoryCacheStore};
use vatomsync_sync::{
    AnimatorConfig, DataPool, LiveUpdateAnimator, RegionConfig, SessionInfo,
};
use vatomsync_types::{PredictedChange, Timestamp};

fn make_pool() -> (DataPool, Arc<MemoryCacheStore>) {
    init_tracing();
    let store = Arc::new(MemoryCacheStore::new());
    let pool = DataPool::new(
        store.clone(),
        LiveUpdateAnimator::new(AnimatorConfig::default()),
        RegionConfig::default(),
    );
    (pool, store)
}

// ── Lookup ───────────────────────────────────────────────────────

#[tokio::test]
async fn matching_lookups_share_one_region() {
    let (pool, _) = make_pool();
    let script = LoadScript::new();

    let first = pool.region(InventoryPlugin::new("u1", script.clone()));
    let second = pool.region(InventoryPlugin::new("u1", script.clone()));
    let other = pool.region(InventoryPlugin::new("u2", script));

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(pool.region_count(), 2);
}

#[tokio::test]
async fn new_region_synchronizes_in_the_background() {
    let (pool, _) = make_pool();
    let script = LoadScript::returning(vec![record("v1", "one", ".")], Some(vec!["v1"]));

    let region = pool.region(InventoryPlugin::new("u1", script.clone()));
    region.synchronize().await.unwrap();

    assert_eq!(script.calls(), 1);
    assert!(region.contains("v1"));
}

#[tokio::test]
async fn new_region_starts_from_its_cached_snapshot() {
    let (pool, store) = make_pool();
    store
        .save("inventory:u1", &[vatom("v0", "cached")])
        .await
        .unwrap();
    let script = LoadScript::returning(vec![record("v1", "one", ".")], None);
    let gate = script.gated();

    let region = pool.region(InventoryPlugin::new("u1", script));
    for _ in 0..50 {
        if region.contains("v0") {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(region.contains("v0"));
    assert!(!region.is_synchronized());

    gate.send_replace(true);
    region.synchronize().await.unwrap();
    assert_eq!(region.ids(), vec!["v0".to_string(), "v1".to_string()]);
}

#[tokio::test]
async fn failed_background_sync_is_only_recorded() {
    let (pool, _) = make_pool();
    let script = LoadScript::new();
    *script.error.lock().unwrap() = Some(vatomsync_sync::SyncError::Timeout);

    let region = pool.region(InventoryPlugin::new("u1", script));
    let result = region.synchronize().await;

    assert_eq!(result, Err(vatomsync_sync::SyncError::Timeout));
    assert_eq!(region.error(), Some(vatomsync_sync::SyncError::Timeout));
    assert_eq!(pool.region_count(), 1);
}

// ── Session lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn session_change_closes_regions_that_reject_it() {
    let (pool, _) = make_pool();
    let script = LoadScript::new();
    let mine = pool.region(InventoryPlugin::new("u1", script.clone()));
    let theirs = pool.region(InventoryPlugin::new("u2", script.clone()));

    let closed = pool.set_session_info(SessionInfo::for_user("u1"));

    assert_eq!(closed, 1);
    assert!(theirs.is_closed());
    assert!(!mine.is_closed());
    assert_eq!(pool.region_count(), 1);
    assert_eq!(pool.session_info(), Some(SessionInfo::for_user("u1")));

    let reopened = pool.region(InventoryPlugin::new("u2", script));
    assert!(!Arc::ptr_eq(&theirs, &reopened));
    assert!(!reopened.is_closed());
}

#[tokio::test]
async fn closing_a_region_removes_it_from_the_pool() {
    let (pool, _) = make_pool();
    let region = pool.region(InventoryPlugin::new("u1", LoadScript::new()));
    assert_eq!(pool.animator().target_count(), 1);

    region.close();

    assert_eq!(pool.region_count(), 0);
    assert_eq!(pool.animator().target_count(), 0);
}

#[tokio::test]
async fn end_session_closes_everything() {
    let (pool, _) = make_pool();
    let script = LoadScript::new();
    pool.set_session_info(SessionInfo::for_user("u1"));
    let a = pool.region(InventoryPlugin::new("u1", script.clone()));
    let b = pool.region(InventoryPlugin::new("u3", script));

    assert_eq!(pool.end_session(), 2);

    assert!(a.is_closed());
    assert!(b.is_closed());
    assert_eq!(pool.region_count(), 0);
    assert_eq!(pool.session_info(), None);
    assert_eq!(pool.animator().target_count(), 0);
}

#[test]
fn session_info_parses_with_defaults() {
    let info: SessionInfo = serde_json::from_value(json!({ "user_id": "u1" })).unwrap();
    assert_eq!(info, SessionInfo::for_user("u1"));
}

// ── Live updates ─────────────────────────────────────────────────

#[tokio::test]
async fn animator_updates_reach_pooled_regions() {
    init_tracing();
    let now = Arc::new(AtomicU64::new(0));
    let clock = now.clone();
    let animator = LiveUpdateAnimator::with_clock(AnimatorConfig::default(), move || {
        Timestamp::from_millis(clock.load(Ordering::SeqCst))
    });
    let pool = DataPool::new(
        Arc::new(MemoryCacheStore::new()),
        animator.clone(),
        RegionConfig::default(),
    );
    let region = pool.region(InventoryPlugin::new("u1", LoadScript::new()));
    region.add(vec![vatom("v1", "here")]).unwrap();

    animator.enqueue(
        "v1",
        vec![PredictedChange::new(
            Timestamp::from_millis(10),
            json!({ "vAtom::vAtomType": { "title": "there" } }),
        )],
    );
    animator.tick();
    assert_eq!(region.get("v1").unwrap().title, "here");

    now.store(10, Ordering::SeqCst);
    animator.tick();
    assert_eq!(region.get("v1").unwrap().title, "there");
}
