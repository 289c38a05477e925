//! Per-Client Rate Limiting
//!
//! Token-bucket admission control keyed by client identity (IP address,
//! device id, or a composite of several components).
//!
//! ## Algorithm
//!
//! Each key owns a bucket of capacity `C` refilled continuously at `R`
//! tokens per second. An admission refills the bucket for the time elapsed
//! since the last refill (capped at `C`), then admits and deducts one token
//! if at least one is available. A denied client is told how long until the
//! next token arrives: `(1 - tokens) / R`.
//!
//! The default calibration is a burst of 15 with a sustained rate of 10 per
//! minute.
//!
//! ## Concurrency
//!
//! Buckets live in a [`DashMap`]. Refill-then-decide runs while holding the
//! entry's shard lock, so two concurrent requests for one key can never both
//! spend the last token. Idle eviction goes through `retain`, which takes
//! the same locks, so a bucket is never evicted in the middle of an
//! admission.
//!
//! ## Usage
//!
//! ```rust
//! use hookguard_auth::rate_limit::{RateLimiter, RateLimitKey};
//! use hookguard_auth::config::RateLimitConfig;
//! use hookguard_auth::clock;
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default(), clock::system());
//! let key = RateLimitKey::ip("192.168.1.1");
//!
//! match limiter.check(&key) {
//!     Ok(()) => { /* proceed */ }
//!     Err(info) => println!("Retry after {:?}", info.retry_after),
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::auth_metrics;
use crate::clock::{self, Clock};
use crate::config::RateLimitConfig;

/// Tolerance for floating-point drift in refill math
const EPSILON: f64 = 1e-9;

/// Per-key token-bucket rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    state: Arc<RateLimitState>,
    clock: Arc<dyn Clock>,
}

/// Key for rate limiting (IP, device id, composite)
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RateLimitKey {
    /// Key type (ip, device, composite)
    pub key_type: String,
    /// Key value
    pub value: String,
}

/// Information about a rate limit denial
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Time until the next request will be admitted
    pub retry_after: Duration,
    /// Bucket capacity
    pub capacity: u32,
    /// Sustained refill rate in tokens per second
    pub refill_rate: f64,
}

#[derive(Debug)]
struct RateLimitState {
    buckets: DashMap<RateLimitKey, Bucket>,
    last_cleanup: Mutex<Instant>,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_access: now,
        }
    }

    /// Tokens the bucket would hold at `now`
    fn available_at(&self, now: Instant, rate: f64, capacity: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * rate).min(capacity)
    }

    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        self.tokens = self.available_at(now, rate, capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
        if self.tokens < 0.0 {
            error!(tokens = self.tokens, "Rate limit bucket holds negative tokens");
            debug_assert!(self.tokens >= 0.0, "rate limit bucket holds negative tokens");
            self.tokens = 0.0;
        }
    }
}

fn retry_after(tokens: f64, rate: f64) -> Duration {
    if tokens + EPSILON >= 1.0 || rate <= 0.0 {
        return Duration::ZERO;
    }
    let nanos = ((1.0 - tokens) / rate * 1e9).ceil();
    Duration::from_nanos(nanos as u64)
}

impl RateLimiter {
    /// Create a limiter with the given configuration and time source
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.monotonic();
        Self {
            config: Arc::new(config),
            state: Arc::new(RateLimitState {
                buckets: DashMap::new(),
                last_cleanup: Mutex::new(now),
            }),
            clock,
        }
    }

    /// Create a limiter that admits everything (for testing)
    pub fn disabled() -> Self {
        Self::new(
            RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
            clock::system(),
        )
    }

    /// Active configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or deny one request for `key`
    ///
    /// Returns `Ok(())` if allowed, `Err(RateLimitInfo)` if rate limited.
    /// The decision and the retry hint come from the same locked bucket
    /// state.
    pub fn check(&self, key: &RateLimitKey) -> Result<(), RateLimitInfo> {
        if !self.config.enabled {
            return Ok(());
        }

        let now = self.clock.monotonic();
        self.maybe_evict(now);

        let capacity = f64::from(self.config.capacity);
        let rate = self.config.refill_rate();

        let decision = {
            let mut bucket = self
                .state
                .buckets
                .entry(key.clone())
                .or_insert_with(|| Bucket::full(capacity, now));
            bucket.refill(now, rate, capacity);
            bucket.last_access = now;

            if bucket.tokens + EPSILON >= 1.0 {
                bucket.tokens = (bucket.tokens - 1.0).max(0.0);
                Ok(())
            } else {
                Err(retry_after(bucket.tokens, rate))
            }
        };

        decision.map_err(|retry_after| {
            auth_metrics::record_rate_limited(&key.key_type);
            warn!(
                key_type = %key.key_type,
                key = %key.value,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            RateLimitInfo {
                retry_after,
                capacity: self.config.capacity,
                refill_rate: rate,
            }
        })
    }

    /// Admit one request for `key`, consuming a token when allowed
    ///
    /// Denial is a normal `false`, never an error.
    pub fn is_allowed(&self, key: &RateLimitKey) -> bool {
        self.check(key).is_ok()
    }

    /// Time until `key` will be admitted again; zero when it would be now
    ///
    /// Unknown keys start with a full bucket and are therefore zero.
    pub fn retry_after(&self, key: &RateLimitKey) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        let now = self.clock.monotonic();
        let rate = self.config.refill_rate();
        self.state
            .buckets
            .get(key)
            .map_or(Duration::ZERO, |bucket| {
                let tokens = bucket.available_at(now, rate, f64::from(self.config.capacity));
                retry_after(tokens, rate)
            })
    }

    /// Tokens currently available to `key`, `None` if it has no bucket yet
    pub fn available_tokens(&self, key: &RateLimitKey) -> Option<f64> {
        let now = self.clock.monotonic();
        let rate = self.config.refill_rate();
        self.state
            .buckets
            .get(key)
            .map(|bucket| bucket.available_at(now, rate, f64::from(self.config.capacity)))
    }

    /// Drop buckets idle for longer than the eviction window
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.monotonic();
        *self.state.last_cleanup.lock() = now;
        self.evict_before(now)
    }

    fn evict_before(&self, now: Instant) -> usize {
        let idle = self.config.idle_eviction();
        let before = self.state.buckets.len();
        self.state
            .buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_access) < idle);
        let evicted = before.saturating_sub(self.state.buckets.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.state.buckets.len(), "Evicted idle rate limit buckets");
        }
        evicted
    }

    fn maybe_evict(&self, now: Instant) {
        let due = {
            let Some(mut last) = self.state.last_cleanup.try_lock() else {
                return;
            };
            if now.saturating_duration_since(*last) >= self.config.cleanup_interval() {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            self.evict_before(now);
        }
    }

    /// Reset limits for a specific key
    pub fn reset(&self, key: &RateLimitKey) {
        self.state.buckets.remove(key);
    }

    /// Reset all limits
    pub fn reset_all(&self) {
        self.state.buckets.clear();
    }

    /// Number of live buckets
    pub fn bucket_count(&self) -> usize {
        self.state.buckets.len()
    }
}

impl RateLimitKey {
    /// Create a key based on IP address
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            key_type: "ip".to_string(),
            value: ip.into(),
        }
    }

    /// Create a key based on a registered device id
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            key_type: "device".to_string(),
            value: device_id.into(),
        }
    }

    /// Create a composite key from multiple components
    ///
    /// Useful for more precise rate limiting, e.g., IP + endpoint.
    pub fn composite(components: Vec<(&str, &str)>) -> Self {
        let value = components
            .into_iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            key_type: "composite".to_string(),
            value,
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key_type, self.value)
    }
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rate limited: burst {} at {:.4} req/s, retry after {:?}",
            self.capacity, self.refill_rate, self.retry_after
        )
    }
}

impl std::error::Error for RateLimitInfo {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::at(0);
        (RateLimiter::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_default_burst_then_denial_then_recovery() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        let key = RateLimitKey::ip("192.168.1.1");

        for i in 0..15 {
            assert!(limiter.is_allowed(&key), "Request {} should be allowed", i);
        }

        let info = limiter.check(&key).unwrap_err();
        assert!(info.retry_after > Duration::ZERO);
        assert!(info.retry_after <= Duration::from_secs(6) + Duration::from_nanos(1));
        assert_eq!(limiter.retry_after(&key), info.retry_after);

        clock.advance(info.retry_after);
        assert!(limiter.is_allowed(&key));
        assert!(!limiter.is_allowed(&key));
    }

    #[test]
    fn test_denial_does_not_consume() {
        let (limiter, clock) = limiter(
            RateLimitConfig::default()
                .with_capacity(1)
                .with_refill(1, Duration::from_secs(10)),
        );
        let key = RateLimitKey::device("d1");

        assert!(limiter.is_allowed(&key));
        for _ in 0..5 {
            assert!(!limiter.is_allowed(&key));
        }
        clock.advance(Duration::from_secs(10));
        assert!(limiter.is_allowed(&key));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (limiter, clock) = limiter(RateLimitConfig::default().with_capacity(3));
        let key = RateLimitKey::ip("10.0.0.1");

        assert!(limiter.is_allowed(&key));
        clock.advance(Duration::from_secs(3600));

        let available = limiter.available_tokens(&key).unwrap();
        assert!((available - 3.0).abs() < EPSILON);
    }

    #[test]
    fn test_rate_limiter_different_keys() {
        let (limiter, _) = limiter(RateLimitConfig::default().with_capacity(1));
        let key1 = RateLimitKey::ip("192.168.1.1");
        let key2 = RateLimitKey::ip("192.168.1.2");

        assert!(limiter.is_allowed(&key1));
        assert!(!limiter.is_allowed(&key1));

        // Exhausting key1 leaves key2 untouched
        assert!(limiter.is_allowed(&key2));
        let wait = limiter.retry_after(&key2);
        assert!(wait >= Duration::from_secs(6) && wait < Duration::from_secs(6) + Duration::from_micros(1));
    }

    #[test]
    fn test_unknown_key_has_no_wait() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        assert_eq!(limiter.retry_after(&RateLimitKey::ip("1.1.1.1")), Duration::ZERO);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_idle_buckets_evicted() {
        let (limiter, clock) = limiter(
            RateLimitConfig::default().with_idle_eviction(Duration::from_secs(600)),
        );
        let stale = RateLimitKey::ip("10.0.0.1");
        let fresh = RateLimitKey::ip("10.0.0.2");

        limiter.is_allowed(&stale);
        clock.advance(Duration::from_secs(300));
        limiter.is_allowed(&fresh);
        clock.advance(Duration::from_secs(300));

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert!(limiter.available_tokens(&stale).is_none());
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::disabled();
        let key = RateLimitKey::ip("192.168.1.1");

        // Should allow unlimited requests
        for _ in 0..1000 {
            assert!(limiter.check(&key).is_ok());
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_rate_limiter_reset() {
        let (limiter, _) = limiter(RateLimitConfig::default().with_capacity(1));
        let key = RateLimitKey::ip("192.168.1.1");

        assert!(limiter.check(&key).is_ok());
        assert!(limiter.check(&key).is_err());

        // Reset should allow requests again
        limiter.reset(&key);
        assert!(limiter.check(&key).is_ok());
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_capacity() {
        let (limiter, _) = limiter(RateLimitConfig::default().with_capacity(15));
        let key = RateLimitKey::ip("203.0.113.7");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let key = key.clone();
                std::thread::spawn(move || (0..10).filter(|_| limiter.is_allowed(&key)).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 15);
    }

    #[test]
    fn test_rate_limit_key_creation() {
        let ip_key = RateLimitKey::ip("10.0.0.1");
        assert_eq!(ip_key.key_type, "ip");
        assert_eq!(ip_key.value, "10.0.0.1");

        let device_key = RateLimitKey::device("d-42");
        assert_eq!(device_key.to_string(), "device:d-42");

        let composite = RateLimitKey::composite(vec![("ip", "10.0.0.1"), ("endpoint", "/export")]);
        assert_eq!(composite.key_type, "composite");
        assert_eq!(composite.value, "ip:10.0.0.1|endpoint:/export");
    }
}
