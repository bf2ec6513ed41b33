use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use vatomsync_sync::{
    AnimatorConfig, CoordinatorConfig, PageFilter, RegionConfig, SyncError, SyncSettings,
};

// ── Settings ─────────────────────────────────────────────────────

#[test]
fn defaults() {
    let settings = SyncSettings::default();

    assert_eq!(settings.region.save_debounce(), Duration::from_secs(5));
    assert_eq!(settings.animator.tick_interval(), Duration::from_millis(20));
    assert_eq!(settings.coordinator.page_size, 100);
    assert_eq!(settings.coordinator.concurrent_pages, 4);
    assert_eq!(settings.coordinator.max_pages, 50);
    assert_eq!(settings.coordinator.request_timeout(), Duration::from_secs(30));
    assert_eq!(
        settings.coordinator.parent_field.as_deref(),
        Some("vAtom::vAtomType.parent_id")
    );
}

#[test]
fn partial_json_keeps_other_defaults() {
    let settings = SyncSettings::from_json_str(
        r#"{
            "region": { "save_debounce_ms": 250 },
            "coordinator": { "max_pages": 3, "filter": { "scope": "inventory" } }
        }"#,
    )
    .unwrap();

    assert_eq!(
        settings.region,
        RegionConfig {
            save_debounce_ms: 250,
            ..RegionConfig::default()
        }
    );
    assert_eq!(settings.animator, AnimatorConfig::default());
    assert_eq!(settings.coordinator.max_pages, 3);
    assert_eq!(settings.coordinator.filter.scope, "inventory");
    assert_eq!(settings.coordinator.page_size, CoordinatorConfig::default().page_size);
}

#[test]
fn zero_tick_interval_is_clamped() {
    let config = AnimatorConfig { tick_interval_ms: 0 };
    assert_eq!(config.tick_interval(), Duration::from_millis(1));
}

#[test]
fn malformed_json_is_a_decode_error() {
    let result = SyncSettings::from_json_str("{ not json");
    assert!(matches!(result, Err(SyncError::Decode(_))));
}

#[test]
fn settings_load_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "animator": {{ "tick_interval_ms": 50 }} }}"#).unwrap();

    let settings = SyncSettings::from_file(file.path()).unwrap();

    assert_eq!(settings.animator.tick_interval_ms, 50);
    assert_eq!(settings.region, RegionConfig::default());
}

#[test]
fn missing_file_is_a_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SyncSettings::from_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(SyncError::Storage(_))));
}

#[test]
fn settings_round_trip_through_json() {
    let settings = SyncSettings {
        coordinator: CoordinatorConfig {
            filter: PageFilter::new("inventory"),
            parent_field: None,
            ..CoordinatorConfig::default()
        },
        ..SyncSettings::default()
    };

    let text = serde_json::to_string(&settings).unwrap();
    assert_eq!(SyncSettings::from_json_str(&text).unwrap(), settings);
}
