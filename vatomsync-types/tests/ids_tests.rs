use std::collections::HashSet;
use std::str::FromStr;
use vatomsync_types::SubscriptionId;

#[test]
fn new_ids_are_unique() {
    let ids: HashSet<SubscriptionId> = (0..100).map(|_| SubscriptionId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn display_and_parse() {
    let id = SubscriptionId::new();
    let parsed = SubscriptionId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
    assert_eq!(parsed.as_uuid(), id.as_uuid());
}

#[test]
fn parse_invalid() {
    assert!(SubscriptionId::from_str("not-a-uuid").is_err());
}

#[test]
fn serializes_as_a_bare_string() {
    let id = SubscriptionId::new();
    let json = serde_json::to_value(id).unwrap();
    assert_eq!(json, serde_json::Value::String(id.to_string()));
    assert_eq!(serde_json::from_value::<SubscriptionId>(json).unwrap(), id);
}
