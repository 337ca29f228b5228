//! trigger_queue.rs
//! Single-slot coalescing channel from the periodic driver to the control task.
//!
//! The producer never blocks and the slot never grows: a trigger that arrives before the
//! consumer drained the previous one replaces it. The consumer always acts on the newest
//! signal. Freshness of input wins over completeness of history.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

struct Slot<T> {
    pending: Option<T>,
    closed: bool,
}

pub struct TriggerQueue<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    coalesced: AtomicU64,
}

impl<T> TriggerQueue<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot { pending: None, closed: false }),
            ready: Condvar::new(),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Post a trigger. Returns `true` if an undelivered trigger was overwritten.
    pub fn trigger(&self, value: T) -> bool {
        let replaced = {
            let mut slot = self.slot.lock();
            slot.pending.replace(value).is_some()
        };
        if replaced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        replaced
    }

    /// Block until a trigger is available. `None` once closed and empty.
    pub fn wait(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(v) = slot.pending.take() {
                return Some(v);
            }
            if slot.closed {
                return None;
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Like `wait`, bounded. `None` on timeout or when closed.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(v) = slot.pending.take() {
                return Some(v);
            }
            if slot.closed || self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.pending.take();
            }
        }
    }

    /// Non-blocking drain.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().pending.take()
    }

    /// Wake the consumer for teardown. Pending triggers are still delivered once.
    pub fn close(&self) {
        self.slot.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Triggers that were overwritten before the consumer saw them.
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl<T> Default for TriggerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
