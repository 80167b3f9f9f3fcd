// Per-peer poll scheduling: capped exponential backoff.
// Pure policy; the only persistent state is the next_stats_allowed_at column it computes.

/// Backoff policy: delay = base * 2^min(failure_count, cap_exponent).
/// With the defaults (60s base, cap 5) the delay tops out at 1920s, so even
/// long-dead peers are still re-checked periodically.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_secs: u64,
    cap_exponent: u32,
}

impl BackoffPolicy {
    pub fn new(base_secs: u64, cap_exponent: u32) -> Self {
        Self {
            base_secs,
            cap_exponent,
        }
    }

    /// Delay in seconds after `failure_count` consecutive failures.
    pub fn delay_secs(&self, failure_count: u32) -> u64 {
        self.base_secs * 2u64.pow(failure_count.min(self.cap_exponent))
    }

    /// Next-allowed timestamp (ms) after a successful poll: one base interval out.
    pub fn next_after_success(&self, now_ms: i64) -> i64 {
        now_ms + (self.base_secs as i64) * 1000
    }

    /// Next-allowed timestamp (ms) after a failed poll with the given (already
    /// incremented) failure count.
    pub fn next_after_failure(&self, failure_count: u32, now_ms: i64) -> i64 {
        now_ms + (self.delay_secs(failure_count) as i64) * 1000
    }
}

/// A peer with no next-allowed timestamp, or one at or before `now_ms`, may be polled.
pub fn is_eligible(next_stats_allowed_at: Option<i64>, now_ms: i64) -> bool {
    match next_stats_allowed_at {
        None => true,
        Some(t) => t <= now_ms,
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(60, 5)
    }
}
