//! diag_mutex.rs
//! Binary lock that remembers who holds it and turns starvation into a fatal fault.
//!
//! Shared controller state (zone table, valve manager + actuator, metrics, connection
//! internals) is mutated in place. Continuing without the lock could corrupt it, so a
//! `lock()` that cannot be satisfied inside the safety timeout stops the process with
//! the holder identity, the holder's acquisition site, the requester and the wait time.
//!
//! - `lock(identity)`            : bounded by the safety timeout, fatal on expiry
//! - `lock_timeout(identity, ms)`: caller opted into contention, returns `Option`

use std::{
    fmt,
    ops::{Deref, DerefMut},
    panic::Location,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use log::error;
use parking_lot::{Mutex, MutexGuard};

pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Who holds the lock and where they took it.
#[derive(Debug, Clone)]
pub struct HolderRecord {
    pub identity: String,
    pub trace: String,
    pub acquired_at: Instant,
}

/// Everything known at the moment a `lock()` gave up.
#[derive(Debug, Clone)]
pub struct StarvationReport {
    pub lock_name: &'static str,
    pub holder: Option<HolderRecord>,
    pub requester: String,
    pub requester_trace: String,
    pub waited: Duration,
}

impl fmt::Display for StarvationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lock '{}' starved: requester '{}' ({}) waited {} ms; ",
            self.lock_name,
            self.requester,
            self.requester_trace,
            self.waited.as_millis()
        )?;
        match &self.holder {
            Some(h) => write!(
                f,
                "held by '{}' for {} ms, acquired at {}",
                h.identity,
                h.acquired_at.elapsed().as_millis(),
                h.trace
            ),
            None => write!(f, "holder unknown (released or not yet recorded)"),
        }
    }
}

/// Invoked once when a safety-bounded `lock()` starves.
pub type FatalHandler = Arc<dyn Fn(&StarvationReport) + Send + Sync>;

/// Production handler: log the full context and abort. A supervisor restarts the unit.
pub fn abort_on_starvation(report: &StarvationReport) {
    error!("[DiagMutex] FATAL {}", report);
    std::process::abort();
}

pub struct DiagMutex<T> {
    name: &'static str,
    data: Mutex<T>,
    holder: Mutex<Option<HolderRecord>>,
    safety_timeout: Duration,
    fatal: FatalHandler,
}

impl<T> DiagMutex<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            data: Mutex::new(value),
            holder: Mutex::new(None),
            safety_timeout: DEFAULT_SAFETY_TIMEOUT,
            fatal: Arc::new(abort_on_starvation),
        }
    }

    pub fn with_safety_timeout(mut self, timeout: Duration) -> Self {
        self.safety_timeout = timeout;
        self
    }

    /// Replace the abort. If the handler returns, `lock()` panics instead of
    /// handing out an unguarded value.
    pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.fatal = handler;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Snapshot of the current holder, if any.
    pub fn holder(&self) -> Option<HolderRecord> {
        self.holder.lock().clone()
    }

    /// Acquire or die trying.
    #[track_caller]
    pub fn lock(&self, identity: &str) -> DiagGuard<'_, T> {
        let site = Location::caller();
        self.lock_fatal(identity, site)
    }

    /// `timeout_ms == 0` means "use the safety timeout" (fatal path).
    /// Any other value hands contention back to the caller.
    #[track_caller]
    pub fn lock_timeout(&self, identity: &str, timeout_ms: u64) -> Option<DiagGuard<'_, T>> {
        let site = Location::caller();
        if timeout_ms == 0 {
            return Some(self.lock_fatal(identity, site));
        }
        self.data
            .try_lock_for(Duration::from_millis(timeout_ms))
            .map(|guard| self.record(identity, site, guard))
    }

    fn lock_fatal(&self, identity: &str, site: &'static Location<'static>) -> DiagGuard<'_, T> {
        let started = Instant::now();
        match self.data.try_lock_for(self.safety_timeout) {
            Some(guard) => self.record(identity, site, guard),
            None => {
                let report = StarvationReport {
                    lock_name: self.name,
                    holder: self.holder(),
                    requester: identity.to_string(),
                    requester_trace: trace_of(site),
                    waited: started.elapsed(),
                };
                (self.fatal)(&report);
                panic!("{}", report);
            }
        }
    }

    fn record<'a>(
        &'a self,
        identity: &str,
        site: &'static Location<'static>,
        guard: MutexGuard<'a, T>,
    ) -> DiagGuard<'a, T> {
        *self.holder.lock() = Some(HolderRecord {
            identity: identity.to_string(),
            trace: trace_of(site),
            acquired_at: Instant::now(),
        });
        DiagGuard { owner_holder: &self.holder, guard }
    }
}

fn trace_of(site: &Location<'_>) -> String {
    let current = thread::current();
    format!(
        "{}:{} on thread '{}'",
        site.file(),
        site.line(),
        current.name().unwrap_or("unnamed")
    )
}

/// RAII access. Dropping (or `unlock`) clears the holder record, then releases.
pub struct DiagGuard<'a, T> {
    owner_holder: &'a Mutex<Option<HolderRecord>>,
    guard: MutexGuard<'a, T>,
}

impl<T> DiagGuard<'_, T> {
    pub fn unlock(self) {}
}

impl<T> Deref for DiagGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for DiagGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for DiagGuard<'_, T> {
    fn drop(&mut self) {
        *self.owner_holder.lock() = None;
    }
}
