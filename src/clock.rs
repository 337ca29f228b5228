//! clock.rs
//! Time sources for the control loop and the zone cache.
//!
//! - Monotonic milliseconds drive PID `dt` (jitter tolerant, never goes backwards).
//! - Wall-clock UTC stamps zone records for staleness classification.

use std::{
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Instant,
};

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;

    /// Wall-clock time.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Process clock: `Instant` for monotonic time, system time for UTC.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic tests and benches.
pub struct ManualClock {
    now_ms: AtomicU64,
    utc_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
            utc_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Moves both the monotonic and the wall clock forward.
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
        self.utc_ms.fetch_add(ms as i64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let ms = self.utc_ms.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
    }
}
