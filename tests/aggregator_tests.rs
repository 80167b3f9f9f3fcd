// Pure metric helpers: continuity, success rate, percentiles, seed visibility

use podwatch::aggregator::{percentile, seed_visibility_buckets, success_rate, uptime_continuity};
use podwatch::models::Seed;
use podwatch::telemetry_repo::SampleWindow;

const HOUR_MS: i64 = 3_600_000;

fn window(first: i64, last: i64, count: i64) -> SampleWindow {
    SampleWindow {
        count,
        first_ts: Some(first),
        last_ts: Some(last),
    }
}

#[test]
fn test_continuity_full_window() {
    let w = window(0, HOUR_MS, 60);
    assert_eq!(uptime_continuity(&w, HOUR_MS), 100.0);
}

#[test]
fn test_continuity_half_window() {
    let w = window(0, HOUR_MS / 2, 30);
    assert_eq!(uptime_continuity(&w, HOUR_MS), 50.0);
}

#[test]
fn test_continuity_caps_at_100() {
    // Span longer than the window (samples straddling the cutoff).
    let w = window(0, 2 * HOUR_MS, 120);
    assert_eq!(uptime_continuity(&w, HOUR_MS), 100.0);
}

#[test]
fn test_continuity_no_samples_is_zero() {
    let w = SampleWindow {
        count: 0,
        first_ts: None,
        last_ts: None,
    };
    assert_eq!(uptime_continuity(&w, HOUR_MS), 0.0);
}

#[test]
fn test_continuity_single_sample_is_zero() {
    // One sample: first == last, no span to cover.
    let w = window(500, 500, 1);
    assert_eq!(uptime_continuity(&w, HOUR_MS), 0.0);
}

#[test]
fn test_success_rate_private_peer_is_zero() {
    assert_eq!(success_rate(false, 100, 0), 0.0);
}

#[test]
fn test_success_rate_no_attempts_is_zero() {
    assert_eq!(success_rate(true, 0, 5), 0.0);
}

#[test]
fn test_success_rate_with_failures() {
    // 75 successes against a 25-failure streak: 75%.
    assert_eq!(success_rate(true, 75, 25), 75.0);
}

#[test]
fn test_success_rate_all_success() {
    assert_eq!(success_rate(true, 48, 0), 100.0);
}

#[test]
fn test_percentile_empty_is_none() {
    assert_eq!(percentile(&[], 0.5), None);
}

#[test]
fn test_percentile_single_value() {
    assert_eq!(percentile(&[42.0], 0.9), Some(42.0));
}

#[test]
fn test_percentile_median_interpolates() {
    assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.5), Some(2.5));
}

#[test]
fn test_percentile_p90() {
    let values: Vec<f64> = (1..=11).map(|v| v as f64).collect();
    assert_eq!(percentile(&values, 0.9), Some(10.0));
}

fn seed(id: i64, url: &str) -> Seed {
    Seed {
        id,
        name: format!("seed-{id}"),
        base_url: url.to_string(),
        enabled: true,
    }
}

#[test]
fn test_seed_visibility_buckets() {
    let seeds = vec![seed(1, "http://a"), seed(2, "http://b")];
    let now = 10 * HOUR_MS;
    // Seed 1 saw peers 10 and 11; peer 11 not within the last hour.
    // Seed 2 saw only peer 10, freshly.
    let last_seen = vec![
        (1, 10, now - HOUR_MS / 2),
        (1, 11, now - 3 * HOUR_MS),
        (2, 10, now),
    ];
    let buckets = seed_visibility_buckets(&seeds, &last_seen, 3, now, HOUR_MS);

    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].seed_base_url, "http://a");
    assert_eq!(buckets[0].nodes_seen, 2);
    assert_eq!(buckets[0].fresh_nodes, 1);
    assert_eq!(buckets[0].stale_nodes, 1);
    assert_eq!(buckets[0].offline_nodes, 1);

    assert_eq!(buckets[1].nodes_seen, 1);
    assert_eq!(buckets[1].fresh_nodes, 1);
    assert_eq!(buckets[1].offline_nodes, 2);
}

#[test]
fn test_seed_visibility_offline_never_negative() {
    let seeds = vec![seed(1, "http://a")];
    // Seen more peers than currently registered (registry shrank).
    let last_seen = vec![(1, 10, 0), (1, 11, 0), (1, 12, 0)];
    let buckets = seed_visibility_buckets(&seeds, &last_seen, 2, HOUR_MS * 2, HOUR_MS);
    assert_eq!(buckets[0].offline_nodes, 0);
}
