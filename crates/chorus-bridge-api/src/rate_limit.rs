//! Per-instance rate limiting
//!
//! Fixed 1-second windows keyed purely on `X-Chorus-Instance-Id`, which
//! preserves user anonymity. The burst budget spans the current and
//! previous window.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use chorus_bridge_types::BridgeError;

struct WindowCounter {
    window: i64,
    count: u32,
    prev_count: u32,
}

/// Anonymity-preserving fixed-window rate limiter
pub struct RateLimiter {
    default_rps: u32,
    burst: u32,
    counters: DashMap<String, WindowCounter>,
}

impl RateLimiter {
    pub fn new(default_rps: u32, burst: u32) -> Self {
        Self {
            default_rps,
            burst,
            counters: DashMap::new(),
        }
    }

    /// Count one request for `instance_id`, rejecting on window exceed
    pub fn check(&self, instance_id: &str) -> Result<(), BridgeError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.check_window(instance_id, now)
    }

    fn check_window(&self, instance_id: &str, window: i64) -> Result<(), BridgeError> {
        let mut counter = self
            .counters
            .entry(instance_id.to_string())
            .or_insert(WindowCounter {
                window,
                count: 0,
                prev_count: 0,
            });
        if counter.window != window {
            counter.prev_count = if counter.window == window - 1 {
                counter.count
            } else {
                0
            };
            counter.window = window;
            counter.count = 0;
        }
        counter.count += 1;

        if counter.count > self.default_rps {
            return Err(BridgeError::RateLimited);
        }
        if counter.count + counter.prev_count > self.burst {
            return Err(BridgeError::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rps_limit_within_one_window() {
        let limiter = RateLimiter::new(3, 100);
        for _ in 0..3 {
            assert!(limiter.check_window("stage-a", 10).is_ok());
        }
        assert!(matches!(
            limiter.check_window("stage-a", 10),
            Err(BridgeError::RateLimited)
        ));
        // A different sender has its own budget
        assert!(limiter.check_window("stage-b", 10).is_ok());
    }

    #[test]
    fn test_window_rollover_resets_rps() {
        let limiter = RateLimiter::new(2, 100);
        assert!(limiter.check_window("stage-a", 10).is_ok());
        assert!(limiter.check_window("stage-a", 10).is_ok());
        assert!(limiter.check_window("stage-a", 11).is_ok());
        assert!(limiter.check_window("stage-a", 11).is_ok());
    }

    #[test]
    fn test_burst_spans_adjacent_windows() {
        let limiter = RateLimiter::new(4, 6);
        for _ in 0..4 {
            assert!(limiter.check_window("stage-a", 10).is_ok());
        }
        assert!(limiter.check_window("stage-a", 11).is_ok());
        assert!(limiter.check_window("stage-a", 11).is_ok());
        // 4 in the previous window + 3 in this one exceeds the burst of 6
        assert!(matches!(
            limiter.check_window("stage-a", 11),
            Err(BridgeError::RateLimited)
        ));
    }

    #[test]
    fn test_stale_window_clears_burst_history() {
        let limiter = RateLimiter::new(4, 5);
        for _ in 0..4 {
            assert!(limiter.check_window("stage-a", 10).is_ok());
        }
        // Two windows later the previous count no longer applies
        for _ in 0..4 {
            assert!(limiter.check_window("stage-a", 12).is_ok());
        }
    }
}
