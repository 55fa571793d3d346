//! Mutex, read-write lock and yield for interpreted callers. Every lock and
//! unlock call releases the interpreter lock while it runs, so a holder
//! that needs the interpreter to reach its `unlock` is never starved.

use hgcore::abt;

use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;

pub struct Mutex {
    inner: abt::Mutex,
}

impl Mutex {
    pub fn new(recursive: bool) -> Self {
        Self { inner: abt::Mutex::new(recursive) }
    }

    pub fn is_recursive(&self) -> bool {
        self.inner.is_recursive()
    }

    pub fn lock(&self, gil: Gil<'_>) -> Result<()> {
        gil.allow_native(|| self.inner.lock()).op("mutex_lock")
    }

    /// Never blocks; `false` when another thread owns the mutex.
    pub fn try_lock(&self) -> bool {
        self.inner.try_lock()
    }

    pub fn unlock(&self, gil: Gil<'_>) -> Result<()> {
        gil.allow_native(|| self.inner.unlock()).op("mutex_unlock")
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Default)]
pub struct RwLock {
    inner: abt::RwLock,
}

impl RwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_lock(&self, gil: Gil<'_>) -> Result<()> {
        gil.allow_native(|| self.inner.read_lock()).op("rwlock_rdlock")
    }

    pub fn write_lock(&self, gil: Gil<'_>) -> Result<()> {
        gil.allow_native(|| self.inner.write_lock()).op("rwlock_wrlock")
    }

    /// Releases the write lock if held by this thread, otherwise one read lock.
    pub fn unlock(&self, gil: Gil<'_>) -> Result<()> {
        gil.allow_native(|| self.inner.unlock()).op("rwlock_unlock")
    }
}

/// Lets other threads run, with the interpreter lock released.
pub fn yield_now(gil: Gil<'_>) {
    gil.allow_native(abt::thread_yield);
}
