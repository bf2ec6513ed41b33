mod common;

use common::{InventoryPlugin, LoadScript, init_tracing, vatom};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use vatomsync_storage::MemoryCacheStore;
use vatomsync_sync::{Region, RegionConfig, Undo};

fn region_with(title: &str) -> Arc<Region<InventoryPlugin>> {
    init_tracing();
    let region = Region::new(
        InventoryPlugin::new("u1", LoadScript::new()),
        Arc::new(MemoryCacheStore::new()),
        &RegionConfig::default(),
    );
    region.add(vec![vatom("v1", title)]).unwrap();
    region
}

#[test]
fn noop_undo_does_nothing() {
    let undo = Undo::noop();
    assert_eq!(format!("{undo:?}"), "Undo { armed: false }");
    undo.undo();
    Undo::noop().dismiss();
}

#[tokio::test]
async fn optimistic_write_returns_an_armed_undo() {
    let region = region_with("mine");

    let undo = region
        .preemptive_change("v1", "vAtom::vAtomType.title", json!("yours"))
        .unwrap();

    assert_eq!(format!("{undo:?}"), "Undo { armed: true }");
}

#[tokio::test]
async fn dismiss_keeps_the_change() {
    let region = region_with("mine");

    region
        .preemptive_change("v1", "vAtom::vAtomType.title", json!("yours"))
        .unwrap()
        .dismiss();

    assert_eq!(region.get("v1").map(|item| item.title), Some("yours".to_string()));
}

#[tokio::test]
async fn dropping_a_removal_undo_keeps_the_object_removed() {
    let region = region_with("mine");

    drop(region.preemptive_remove("v1").unwrap());

    assert!(!region.contains("v1"));
}

#[tokio::test]
async fn undo_after_the_region_is_gone_is_harmless() {
    let region = region_with("mine");
    let undo = region.preemptive_remove("v1").unwrap();

    drop(region);
    undo.undo();
}
