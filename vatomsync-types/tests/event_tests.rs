use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use vatomsync_types::{PredictedChange, PushEvent, SubscriptionId, Timestamp};

// ── PushEvent ─────────────────────────────────────────────────────

#[test]
fn push_event_object_id() {
    assert_eq!(PushEvent::Connected.object_id(), None);
    assert_eq!(PushEvent::Disconnected.object_id(), None);
    assert_eq!(
        PushEvent::RecordRemoved { id: "v1".into() }.object_id(),
        Some("v1")
    );
    let predicted = PushEvent::PredictedStateUpdate {
        id: "v2".into(),
        changes: vec![PredictedChange::new(Timestamp::from_millis(10), json!({}))],
    };
    assert_eq!(predicted.object_id(), Some("v2"));
}

#[test]
fn push_event_record_change_classification() {
    assert!(PushEvent::RecordInserted { id: "v".into() }.is_record_change());
    assert!(
        PushEvent::RecordPartialUpdate {
            id: "v".into(),
            changes: json!({})
        }
        .is_record_change()
    );
    assert!(!PushEvent::Connected.is_record_change());
    assert!(
        !PushEvent::PredictedStateUpdate {
            id: "v".into(),
            changes: vec![]
        }
        .is_record_change()
    );
}

#[test]
fn push_event_tagged_json() {
    let event = PushEvent::RecordPartialUpdate {
        id: "v1".into(),
        changes: json!({ "title": "x" }),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(
        value,
        json!({ "kind": "record_partial_update", "data": { "id": "v1", "changes": { "title": "x" } } })
    );
    let parsed: PushEvent = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, event);
}

#[test]
fn push_event_unit_variant_json() {
    let value = serde_json::to_value(PushEvent::Connected).unwrap();
    assert_eq!(value, json!({ "kind": "connected" }));
}

// ── Timestamp ─────────────────────────────────────────────────────

#[test]
fn timestamp_ordering_and_passing() {
    let a = Timestamp::from_millis(100);
    let b = Timestamp::from_millis(200);
    assert!(a < b);
    assert!(a.has_passed(b));
    assert!(b.has_passed(b));
    assert!(!b.has_passed(a));
    assert_eq!(b.until(a), Duration::from_millis(100));
    assert_eq!(a.until(b), Duration::ZERO);
}

#[test]
fn timestamp_after_saturates() {
    let t = Timestamp::from_millis(u64::MAX - 1);
    assert_eq!(t.after(Duration::from_secs(5)).as_millis(), u64::MAX);
}

#[test]
fn timestamp_now_is_recent() {
    let now = Timestamp::now();
    assert!(now.as_millis() > 1_500_000_000_000);
}

#[test]
fn timestamp_serde_transparent() {
    let json = serde_json::to_string(&Timestamp::from_millis(42)).unwrap();
    assert_eq!(json, "42");
}

// ── SubscriptionId ────────────────────────────────────────────────

#[test]
fn subscription_ids_unique() {
    let ids: HashSet<SubscriptionId> = (0..100).map(|_| SubscriptionId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn subscription_id_display_roundtrip() {
    let id = SubscriptionId::new();
    let parsed: SubscriptionId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}
