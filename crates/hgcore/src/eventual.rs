//! Single-assignment completion cell, the engine's analogue of an
//! Argobots eventual. Producers `set` once; consumers block, poll, or
//! block with a deadline.

use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;

pub(crate) struct Eventual<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Eventual<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Stores the value unless one is already present. Returns whether it was stored.
    pub(crate) fn set(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.ready.notify_all();
        true
    }

    pub(crate) fn test(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(v) = slot.as_ref() {
                return v.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Waits until `deadline`; `None` means the deadline passed first.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(v) = slot.as_ref() {
                return Some(v.clone());
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().cloned();
            }
        }
    }
}
