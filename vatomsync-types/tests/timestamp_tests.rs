use std::time::Duration;
use vatomsync_types::Timestamp;

#[test]
fn has_passed_includes_the_exact_moment() {
    let t = Timestamp::from_millis(100);
    assert!(!t.has_passed(Timestamp::from_millis(99)));
    assert!(t.has_passed(Timestamp::from_millis(100)));
    assert!(t.has_passed(Timestamp::from_millis(101)));
}

#[test]
fn after_saturates() {
    assert_eq!(
        Timestamp::from_millis(10).after(Duration::from_millis(5)),
        Timestamp::from_millis(15)
    );
    assert_eq!(
        Timestamp::from_millis(u64::MAX).after(Duration::from_secs(1)),
        Timestamp::from_millis(u64::MAX)
    );
}

#[test]
fn until_is_zero_once_passed() {
    let t = Timestamp::from_millis(100);
    assert_eq!(t.until(Timestamp::from_millis(40)), Duration::from_millis(60));
    assert_eq!(t.until(Timestamp::from_millis(400)), Duration::ZERO);
}

#[test]
fn now_is_monotonic_enough() {
    let a = Timestamp::now();
    let b = Timestamp::now();
    assert!(a <= b);
    assert!(a.as_millis() > 0);
}

#[test]
fn serializes_as_millis() {
    let t = Timestamp::from_millis(1_700_000_000_000);
    assert_eq!(serde_json::to_string(&t).unwrap(), "1700000000000");
    assert_eq!(t.to_string(), "1700000000000ms");
}
