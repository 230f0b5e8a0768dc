//! Injectable time sources.
//!
//! All protocol deadlines are computed against the *store's* clock; this
//! module only feeds the in-memory store and local bookkeeping. The
//! [`TimeProvider`] trait lets tests drive expiry deterministically with
//! [`SimulatedTimeProvider`] instead of sleeping.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch rather than
/// panicking.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Trait for injectable clock sources.
pub trait TimeProvider: Send + Sync {
    /// Current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Controllable clock for deterministic tests.
///
/// Clones share the underlying counter, so a test can hold one handle while
/// the store under test holds another.
#[derive(Debug, Clone)]
pub struct SimulatedTimeProvider {
    current_ms: Arc<AtomicU64>,
}

impl SimulatedTimeProvider {
    /// Create a provider starting at the given timestamp.
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(initial_ms)),
        }
    }

    /// Create a provider starting at the current system time.
    pub fn from_system_time() -> Self {
        Self::new(current_time_ms())
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.current_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the clock to a specific timestamp.
    pub fn set_ms(&self, time_ms: u64) {
        self.current_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Default for SimulatedTimeProvider {
    fn default() -> Self {
        Self::from_system_time()
    }
}

impl TimeProvider for SimulatedTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}
