//! Request quota guard.
//!
//! Admission control for two caller classes:
//! - anonymous callers, identified by a request fingerprint (limit 20/window)
//! - authenticated users drawing from a separate AI-feature pool (100/window)
//!
//! Fixed-window counters with lazy reset. The store is an explicit object
//! injected into callers rather than ambient global state; memory is bounded
//! by a TTL eviction pass.

use crate::config::QuotaConfig;
use crate::types::QuotaDecision;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Client-derived signals used to identify an anonymous caller.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Forwarded client IP.
    pub ip: String,
    pub user_agent: String,
    pub accept_language: String,
}

impl RequestMeta {
    /// Deterministic identity hash: SHA-256 over the canonical
    /// `ip|user_agent|accept_language` concatenation, lowercase hex.
    ///
    /// This separates distinct anonymous clients; it is not a credential.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ip.as_bytes());
        hasher.update(b"|");
        hasher.update(self.user_agent.as_bytes());
        hasher.update(b"|");
        hasher.update(self.accept_language.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Per-identity counter state. Created lazily on first request.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Fixed-window rate limiter keyed by identity.
///
/// The increment-and-check runs under one write lock, so two simultaneous
/// requests at the limit boundary cannot both be admitted.
pub struct QuotaGuard {
    windows: RwLock<HashMap<String, RateWindow>>,
    config: QuotaConfig,
}

impl QuotaGuard {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Check and count one request from an anonymous caller.
    pub fn check_unauth(&self, fingerprint: &str) -> QuotaDecision {
        self.check_at(fingerprint, self.config.unauth_limit, Utc::now())
    }

    /// Check and count one AI-feature call for an authenticated user.
    ///
    /// Separate pool from the unauth limiter; the `ai:` prefix keeps a raw
    /// user id from ever colliding with a fingerprint key.
    pub fn check_ai(&self, user_id: &str) -> QuotaDecision {
        let key = format!("ai:{user_id}");
        self.check_at(&key, self.config.ai_limit, Utc::now())
    }

    fn check_at(&self, key: &str, limit: u32, now: DateTime<Utc>) -> QuotaDecision {
        let window = Duration::seconds(self.config.window_secs as i64);

        let decision = {
            let mut windows = self.windows.write().unwrap();
            let entry = windows.entry(key.to_string()).or_insert(RateWindow {
                window_start: now,
                count: 0,
            });

            if now - entry.window_start >= window {
                entry.window_start = now;
                entry.count = 0;
            }

            // Saturate at the limit: denied requests do not keep counting.
            let allowed = if entry.count < limit {
                entry.count += 1;
                true
            } else {
                false
            };

            QuotaDecision {
                allowed,
                remaining: limit - entry.count,
                limit,
            }
        };

        if !decision.allowed {
            debug!(key, limit, "quota exceeded");
        }

        self.maybe_evict(now);
        decision
    }

    /// Drop windows stale for 2x the window length. Safe to call any time;
    /// also runs automatically once the map outgrows `max_identities`.
    pub fn evict_expired(&self) {
        self.evict_at(Utc::now());
    }

    fn maybe_evict(&self, now: DateTime<Utc>) {
        let over = {
            let windows = self.windows.read().unwrap();
            windows.len() > self.config.max_identities
        };
        if over {
            self.evict_at(now);
        }
    }

    fn evict_at(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.config.window_secs as i64 * 2);
        let mut windows = self.windows.write().unwrap();
        let before = windows.len();
        windows.retain(|_, w| w.window_start > cutoff);
        let dropped = before - windows.len();
        if dropped > 0 {
            debug!(dropped, tracked = windows.len(), "evicted stale quota windows");
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.windows.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaConfig;

    fn guard() -> QuotaGuard {
        QuotaGuard::new(QuotaConfig::default())
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let meta = RequestMeta {
            ip: "203.0.113.7".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
        };
        let a = meta.fingerprint();
        let b = meta.fingerprint();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_changes_with_ip() {
        let base = RequestMeta {
            ip: "203.0.113.7".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            accept_language: "en-US".to_string(),
        };
        let other = RequestMeta {
            ip: "203.0.113.8".to_string(),
            ..base.clone()
        };
        assert_ne!(base.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_unauth_counts_down_then_denies() {
        let guard = guard();

        for i in 1..=20u32 {
            let d = guard.check_unauth("fp1");
            assert!(d.allowed, "call {i} should be allowed");
            assert_eq!(d.remaining, 20 - i);
            assert_eq!(d.limit, 20);
        }

        // 21st and beyond: always denied, remaining pinned at 0.
        for _ in 0..5 {
            let d = guard.check_unauth("fp1");
            assert!(!d.allowed);
            assert_eq!(d.remaining, 0);
        }
    }

    #[test]
    fn test_identities_are_independent() {
        let guard = guard();

        for _ in 0..20 {
            guard.check_unauth("fp1");
        }
        assert!(!guard.check_unauth("fp1").allowed);

        let d = guard.check_unauth("fp2");
        assert!(d.allowed);
        assert_eq!(d.remaining, 19);
    }

    #[test]
    fn test_ai_quota_has_own_pool_and_limit() {
        let guard = guard();

        // Exhaust the unauth pool for this identity string.
        for _ in 0..20 {
            guard.check_unauth("user-1");
        }
        assert!(!guard.check_unauth("user-1").allowed);

        // AI pool for the same id string is untouched and larger.
        for i in 1..=100u32 {
            let d = guard.check_ai("user-1");
            assert!(d.allowed, "ai call {i} should be allowed");
            assert_eq!(d.remaining, 100 - i);
            assert_eq!(d.limit, 100);
        }
        assert!(!guard.check_ai("user-1").allowed);
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let guard = QuotaGuard::new(QuotaConfig {
            window_secs: 3600,
            ..Default::default()
        });
        let t0 = Utc::now();

        for _ in 0..20 {
            guard.check_at("fp1", 20, t0);
        }
        assert!(!guard.check_at("fp1", 20, t0).allowed);

        // One second past the window: full quota again.
        let t1 = t0 + Duration::seconds(3601);
        let d = guard.check_at("fp1", 20, t1);
        assert!(d.allowed);
        assert_eq!(d.remaining, 19);
    }

    #[test]
    fn test_eviction_drops_stale_windows() {
        let guard = QuotaGuard::new(QuotaConfig {
            window_secs: 60,
            ..Default::default()
        });
        let t0 = Utc::now();

        guard.check_at("old", 20, t0);
        guard.check_at("fresh", 20, t0 + Duration::seconds(150));
        assert_eq!(guard.tracked_identities(), 2);

        // "old" started 150s ago, past the 120s retention cutoff.
        guard.evict_at(t0 + Duration::seconds(150));
        assert_eq!(guard.tracked_identities(), 1);
    }

    #[test]
    fn test_concurrent_boundary_admits_exactly_limit() {
        use std::sync::Arc;

        let guard = Arc::new(guard());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let g = guard.clone();
            handles.push(std::thread::spawn(move || {
                let mut admitted = 0u32;
                for _ in 0..5 {
                    if g.check_unauth("shared").allowed {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 20);
    }
}
