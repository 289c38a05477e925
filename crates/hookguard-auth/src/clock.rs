//! Time sources
//!
//! Every component reads time through a [`Clock`] so expiry math, bucket
//! refills and session timeouts can be driven deterministically in tests.
//!
//! - [`SystemClock`] - wall clock + `Instant::now()`
//! - [`ManualClock`] - shared, manually advanced clock for tests and simulations

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of wall-clock and monotonic time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Wall-clock time as whole seconds since the Unix epoch
    fn now_unix(&self) -> u64;

    /// Monotonic reading for elapsed-time math
    fn monotonic(&self) -> Instant;
}

/// Production clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        // A clock before 1970 is treated as the epoch itself
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock
///
/// Cloning shares the underlying state, so a test can keep one handle and
/// hand another to the component under test.
///
/// ```rust
/// use hookguard_auth::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::at(1_700_000_000);
/// let before = clock.monotonic();
/// clock.advance(Duration::from_secs(90));
///
/// assert_eq!(clock.now_unix(), 1_700_000_090);
/// assert_eq!(clock.monotonic() - before, Duration::from_secs(90));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    unix_base: u64,
    instant_base: Instant,
    offset: Duration,
}

impl ManualClock {
    /// Create a clock whose wall time starts at `unix_secs`
    pub fn at(unix_secs: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                unix_base: unix_secs,
                instant_base: Instant::now(),
                offset: Duration::ZERO,
            })),
        }
    }

    /// Create a clock starting at the current system time
    pub fn starting_now() -> Self {
        Self::at(SystemClock.now_unix())
    }

    /// Move both wall and monotonic time forward
    pub fn advance(&self, by: Duration) {
        self.inner.lock().offset += by;
    }

    /// Total time advanced since creation
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().offset
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        let state = self.inner.lock();
        state.unix_base + state.offset.as_secs()
    }

    fn monotonic(&self) -> Instant {
        let state = self.inner.lock();
        state.instant_base + state.offset
    }
}

/// Shared handle to the default system clock
pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
