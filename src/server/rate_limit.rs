//! Per-origin admission control.
//!
//! Fixed-window token bucket: 10 operations per 60 seconds per origin key,
//! matching the limiter the original deployment ran in front of the chat
//! endpoint. Buckets live in a concurrent map; each key serializes its own
//! increments through the map's entry lock and keys never contend with one
//! another. Rejected calls are answered synchronously, never queued.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Limiter configuration.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    /// Operations allowed per window.
    pub points: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            points: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy)]
struct Bucket {
    window_start: Instant,
    used: u32,
}

/// Thread-safe fixed-window rate limiter keyed by client origin.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, Bucket>,
    last_sweep: std::sync::Mutex<Instant>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            last_sweep: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Consume one token for `key`.
    ///
    /// At most one stale bucket per distinct origin ever lives in the map:
    /// every consume that finds a full window elapsed since the last sweep
    /// drops the buckets of origins that went quiet.
    ///
    /// # Errors
    /// Returns the wait until the window reopens when the bucket is empty.
    pub fn consume(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert(Bucket {
                window_start: now,
                used: 0,
            });

        let elapsed = now.saturating_duration_since(entry.window_start);
        if elapsed >= self.config.window {
            entry.window_start = now;
            entry.used = 0;
        }

        let admitted = if entry.used < self.config.points {
            entry.used += 1;
            Ok(())
        } else {
            Err(self.config.window - elapsed)
        };
        drop(entry);

        self.maybe_sweep(now);
        admitted
    }

    /// Drop buckets whose window has long passed. Correctness never depends
    /// on this; it only bounds the map to recently seen origins.
    pub fn sweep(&self) {
        let now = Instant::now();
        let window = self.config.window;
        self.buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.window_start) < window
        });
    }

    /// Sweep at most once per window. Skipped entirely when another caller
    /// is already sweeping. The entry guard must be dropped before this
    /// runs; `retain` takes the same shard locks.
    fn maybe_sweep(&self, now: Instant) {
        let due = match self.last_sweep.try_lock() {
            Ok(mut last) => {
                if now.saturating_duration_since(*last) >= self.config.window {
                    *last = now;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if due {
            self.sweep();
        }
    }

    /// Number of tracked origins.
    #[must_use]
    pub fn tracked_origins(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(points: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            points,
            window: Duration::from_millis(window_ms),
        })
    }

    #[test]
    fn test_eleventh_request_in_window_is_rejected_with_wait_hint() {
        let limiter = limiter(10, 60_000);
        for _ in 0..10 {
            assert!(limiter.consume("origin-a").is_ok());
        }
        let wait = limiter.consume("origin-a").unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_keys_do_not_contend() {
        let limiter = limiter(1, 60_000);
        assert!(limiter.consume("a").is_ok());
        assert!(limiter.consume("b").is_ok());
        assert!(limiter.consume("a").is_err());
    }

    #[test]
    fn test_window_reopens_after_elapse() {
        let limiter = limiter(1, 30);
        assert!(limiter.consume("a").is_ok());
        assert!(limiter.consume("a").is_err());
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.consume("a").is_ok());
    }

    #[test]
    fn test_sweep_drops_stale_buckets() {
        let limiter = limiter(1, 10);
        let _ = limiter.consume("a");
        std::thread::sleep(Duration::from_millis(20));
        limiter.sweep();
        assert_eq!(limiter.tracked_origins(), 0);
    }

    #[test]
    fn test_consume_sweeps_quiet_origins_on_its_own() {
        let limiter = limiter(1, 10);
        for key in ["a", "b", "c"] {
            let _ = limiter.consume(key);
        }
        assert_eq!(limiter.tracked_origins(), 3);

        std::thread::sleep(Duration::from_millis(20));
        // A single live origin is enough to trigger the cleanup.
        let _ = limiter.consume("d");
        assert_eq!(limiter.tracked_origins(), 1);
    }
}
