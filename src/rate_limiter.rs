use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::constants::{DEFAULT_RATE_LIMIT_MAX, RATE_LIMIT_WINDOW};

#[derive(Clone, Debug)]
pub struct AdmissionLimits {
    pub max_per_window: u32,
    pub window: Duration,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_per_window: DEFAULT_RATE_LIMIT_MAX,
            window: RATE_LIMIT_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateBucket {
    pub window_start: i64,
    pub count: u32,
}

/// Fixed-window request counter keyed by source identity.
///
/// Process-local only. Buckets are created on first sight of an identity and
/// dropped again by [`AdmissionLimiter::sweep`] once their window has lapsed.
#[derive(Debug)]
pub struct AdmissionLimiter {
    limits: AdmissionLimits,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl AdmissionLimiter {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    fn window_ms(&self) -> i64 {
        self.limits.window.as_millis() as i64
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, RateBucket>> {
        // A panic while holding the lock cannot leave a bucket half-written.
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one request from `identity` and report whether it is admitted.
    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Utc::now().timestamp_millis())
    }

    pub fn allow_at(&self, identity: &str, now_ms: i64) -> bool {
        let window_ms = self.window_ms();
        let mut buckets = self.buckets();
        let bucket = buckets
            .entry(identity.to_string())
            .or_insert(RateBucket {
                window_start: now_ms,
                count: 0,
            });
        if now_ms - bucket.window_start > window_ms {
            bucket.window_start = now_ms;
            bucket.count = 0;
        }
        bucket.count = bucket.count.saturating_add(1);
        bucket.count <= self.limits.max_per_window
    }

    /// Drop every bucket whose window has already lapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now().timestamp_millis())
    }

    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let window_ms = self.window_ms();
        let mut buckets = self.buckets();
        let before = buckets.len();
        buckets.retain(|_, bucket| now_ms - bucket.window_start <= window_ms);
        before - buckets.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.buckets().len()
    }

    pub fn bucket(&self, identity: &str) -> Option<RateBucket> {
        self.buckets().get(identity).copied()
    }
}

/// Resolve the identity a request is counted against.
///
/// First entry of `x-forwarded-for` wins, then the peer IP, then the empty
/// string. Clients behind a proxy that does not forward collapse into one identity.
pub fn source_identity(forwarded_for: Option<&str>, peer: Option<SocketAddr>) -> String {
    if let Some(first) = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
    {
        return first.to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> AdmissionLimiter {
        AdmissionLimiter::new(AdmissionLimits {
            max_per_window: max,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn admits_exactly_max_then_rejects() {
        let limiter = limiter(5);
        let t0 = 1_700_000_000_000;
        for i in 0..5 {
            assert!(limiter.allow_at("10.0.0.1", t0 + i), "request {i} should pass");
        }
        assert!(!limiter.allow_at("10.0.0.1", t0 + 10));
        assert!(!limiter.allow_at("10.0.0.1", t0 + 20));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = limiter(2);
        let t0 = 1_700_000_000_000;
        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("a", t0 + 1));
        assert!(!limiter.allow_at("a", t0 + 2));
        // Boundary itself still belongs to the old window.
        assert!(!limiter.allow_at("a", t0 + 60_000));
        assert!(limiter.allow_at("a", t0 + 60_001));
        assert_eq!(
            limiter.bucket("a"),
            Some(RateBucket {
                window_start: t0 + 60_001,
                count: 1
            })
        );
    }

    #[test]
    fn identities_are_counted_independently() {
        let limiter = limiter(1);
        let t0 = 1_000;
        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("b", t0));
        assert!(!limiter.allow_at("a", t0));
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[test]
    fn sweep_drops_only_lapsed_buckets() {
        let limiter = limiter(10);
        limiter.allow_at("old", 0);
        limiter.allow_at("fresh", 50_000);
        assert_eq!(limiter.sweep_at(70_000), 1);
        assert!(limiter.bucket("old").is_none());
        assert!(limiter.bucket("fresh").is_some());
    }

    #[test]
    fn identity_prefers_first_forwarded_entry() {
        let peer: SocketAddr = "192.168.1.9:5555".parse().unwrap();
        assert_eq!(
            source_identity(Some(" 203.0.113.7 , 10.0.0.1"), Some(peer)),
            "203.0.113.7"
        );
        assert_eq!(source_identity(None, Some(peer)), "192.168.1.9");
        assert_eq!(source_identity(Some(""), Some(peer)), "192.168.1.9");
        assert_eq!(source_identity(None, None), "");
    }
}
