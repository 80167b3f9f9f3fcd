// Backoff policy tests: capped exponential delays and poll eligibility

use podwatch::backoff::{BackoffPolicy, is_eligible};

#[test]
fn test_delay_doubles_per_failure() {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.delay_secs(0), 60);
    assert_eq!(policy.delay_secs(1), 120);
    assert_eq!(policy.delay_secs(2), 240);
    assert_eq!(policy.delay_secs(3), 480);
    assert_eq!(policy.delay_secs(4), 960);
}

#[test]
fn test_delay_caps_at_exponent() {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.delay_secs(5), 1920);
    assert_eq!(policy.delay_secs(6), 1920);
    assert_eq!(policy.delay_secs(100), 1920);
}

#[test]
fn test_next_after_success_is_one_base_interval() {
    let policy = BackoffPolicy::new(60, 5);
    let now = 1_700_000_000_000;
    assert_eq!(policy.next_after_success(now), now + 60_000);
}

#[test]
fn test_next_after_failure_uses_incremented_count() {
    // Two consecutive failures: delay = 60 * 2^2 = 240s.
    let policy = BackoffPolicy::new(60, 5);
    let now = 1_700_000_000_000;
    assert_eq!(policy.next_after_failure(2, now), now + 240_000);
}

#[test]
fn test_custom_base_and_cap() {
    let policy = BackoffPolicy::new(30, 3);
    assert_eq!(policy.delay_secs(0), 30);
    assert_eq!(policy.delay_secs(3), 240);
    assert_eq!(policy.delay_secs(10), 240);
}

#[test]
fn test_eligibility_without_timestamp() {
    assert!(is_eligible(None, 1_700_000_000_000));
}

#[test]
fn test_eligibility_boundary_is_inclusive() {
    let now = 1_700_000_000_000;
    assert!(is_eligible(Some(now), now));
    assert!(is_eligible(Some(now - 1), now));
    assert!(!is_eligible(Some(now + 1), now));
}
