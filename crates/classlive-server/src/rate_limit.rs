//! Sliding-window rate limiting
//!
//! One limiter instance per endpoint class, keyed by client identity. Each
//! key holds the timestamps of its in-window hits; pruning and recording
//! happen together under a single lock so concurrent requests see a
//! consistent window.

use crate::error::ApiError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Window duration
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

pub struct RateLimiter {
    /// Endpoint label, for log lines only
    name: &'static str,
    config: RateLimitConfig,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`. Over the limit, returns `RateLimited`
    /// with the time until the oldest in-window hit ages out.
    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), ApiError> {
        let mut hits = self.hits.lock();
        let window = self.config.window;
        let entry = hits.entry(key.to_string()).or_default();

        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.config.max_requests as usize {
            let oldest = *entry.front().unwrap_or(&now);
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            warn!(
                endpoint = self.name,
                key = %key,
                hits = entry.len(),
                "Rate limit exceeded"
            );
            return Err(ApiError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        entry.push_back(now);
        Ok(())
    }

    /// Drop keys with no in-window hits left
    pub fn cleanup_expired(&self) {
        let mut hits = self.hits.lock();
        let now = Instant::now();
        let window = self.config.window;
        hits.retain(|_, entry| {
            entry
                .back()
                .map(|last| now.duration_since(*last) < window)
                .unwrap_or(false)
        });
    }
}

/// The per-endpoint limiter set carried in `AppState`
pub struct RateLimits {
    pub join: RateLimiter,
    pub login: RateLimiter,
    pub activity: RateLimiter,
    pub snapshot: RateLimiter,
}

impl RateLimits {
    /// Sweep stale client keys from every limiter; called from the periodic
    /// maintenance task in `main`.
    pub fn cleanup_expired(&self) {
        self.join.cleanup_expired();
        self.login.cleanup_expired();
        self.activity.cleanup_expired();
        self.snapshot.cleanup_expired();
    }

    pub fn new(settings: &crate::config::Settings) -> Self {
        Self {
            join: RateLimiter::new("join", RateLimitConfig::per_minute(settings.join_rate_per_min)),
            login: RateLimiter::new(
                "login",
                RateLimitConfig::per_minute(settings.login_rate_per_min),
            ),
            activity: RateLimiter::new(
                "activity",
                RateLimitConfig::per_minute(settings.activity_rate_per_min),
            ),
            snapshot: RateLimiter::new(
                "snapshot",
                RateLimitConfig::per_minute(settings.snapshot_rate_per_min),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            RateLimitConfig {
                max_requests: max,
                window: Duration::from_secs(window_secs),
            },
        )
    }

    #[test]
    fn test_allows_up_to_limit() {
        let l = limiter(3, 60);
        assert!(l.check("ip").is_ok());
        assert!(l.check("ip").is_ok());
        assert!(l.check("ip").is_ok());
        assert!(l.check("ip").is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let l = limiter(1, 60);
        assert!(l.check("ip1").is_ok());
        assert!(l.check("ip2").is_ok());
        assert!(l.check("ip1").is_err());
    }

    #[test]
    fn test_window_slides() {
        let l = limiter(2, 60);
        let t0 = Instant::now();
        assert!(l.check_at("ip", t0).is_ok());
        assert!(l.check_at("ip", t0 + Duration::from_secs(30)).is_ok());
        assert!(l.check_at("ip", t0 + Duration::from_secs(31)).is_err());
        // First hit ages out; one slot opens
        assert!(l.check_at("ip", t0 + Duration::from_secs(61)).is_ok());
        assert!(l.check_at("ip", t0 + Duration::from_secs(62)).is_err());
    }

    #[test]
    fn test_retry_after_tracks_oldest_hit() {
        let l = limiter(1, 60);
        let t0 = Instant::now();
        assert!(l.check_at("ip", t0).is_ok());
        match l.check_at("ip", t0 + Duration::from_secs(20)) {
            Err(ApiError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 40);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_cleanup_drops_stale_keys() {
        let l = limiter(5, 0);
        assert!(l.check("gone").is_ok());
        l.cleanup_expired();
        assert!(l.hits.lock().is_empty());
    }

    #[test]
    fn test_limits_sweep_covers_every_limiter_and_keeps_fresh_keys() {
        let limits = RateLimits::new(&crate::config::Settings::default());
        limits.join.check("a").unwrap();
        limits.login.check("b").unwrap();
        limits.activity.check("c").unwrap();
        limits.snapshot.check("d").unwrap();
        limits.cleanup_expired();
        // In-window hits survive the sweep
        assert_eq!(limits.join.hits.lock().len(), 1);
        assert_eq!(limits.login.hits.lock().len(), 1);
        assert_eq!(limits.activity.hits.lock().len(), 1);
        assert_eq!(limits.snapshot.hits.lock().len(), 1);
    }
}
