//! # Lightweight-Thread Primitives
//!
//! Mutex, read-write lock and yield in the Argobots shape: explicit
//! `lock`/`unlock` calls rather than guards, because the callers sit on the
//! far side of an FFI-like boundary and cannot hold a Rust borrow across it.
//! Ownership is tracked per OS thread.

use std::thread::ThreadId;

use parking_lot::Condvar;
use parking_lot::Mutex as RawMutex;

use crate::ret::HgResult;
use crate::ret::HgReturn;

fn me() -> ThreadId {
    std::thread::current().id()
}

#[derive(Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

/// `ABT_mutex`, optionally recursive.
pub struct Mutex {
    recursive: bool,
    state: RawMutex<Ownership>,
    released: Condvar,
}

impl Mutex {
    pub fn new(recursive: bool) -> Self {
        Self {
            recursive,
            state: RawMutex::new(Ownership::default()),
            released: Condvar::new(),
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Blocks until the calling thread owns the mutex. Relocking a
    /// non-recursive mutex from its owner fails with `Busy` instead of
    /// deadlocking.
    pub fn lock(&self) -> HgResult<()> {
        let me = me();
        let mut st = self.state.lock();
        loop {
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    if !self.recursive {
                        return Err(HgReturn::Busy);
                    }
                    st.depth += 1;
                    return Ok(());
                }
                Some(_) => self.released.wait(&mut st),
            }
        }
    }

    /// Takes the mutex if free (or already owned, when recursive).
    pub fn try_lock(&self) -> bool {
        let me = me();
        let mut st = self.state.lock();
        match st.owner {
            None => {
                st.owner = Some(me);
                st.depth = 1;
                true
            }
            Some(owner) if owner == me && self.recursive => {
                st.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    pub fn unlock(&self) -> HgResult<()> {
        let mut st = self.state.lock();
        if st.owner != Some(me()) {
            return Err(HgReturn::Permission);
        }
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            self.released.notify_one();
        }
        Ok(())
    }
}

#[derive(Default)]
struct Sharing {
    readers: usize,
    writer: Option<ThreadId>,
}

/// `ABT_rwlock`: many readers or one writer, writer not re-entrant.
#[derive(Default)]
pub struct RwLock {
    state: RawMutex<Sharing>,
    released: Condvar,
}

impl RwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_lock(&self) -> HgResult<()> {
        let mut st = self.state.lock();
        if st.writer == Some(me()) {
            return Err(HgReturn::Busy);
        }
        while st.writer.is_some() {
            self.released.wait(&mut st);
        }
        st.readers += 1;
        Ok(())
    }

    pub fn write_lock(&self) -> HgResult<()> {
        let me = me();
        let mut st = self.state.lock();
        if st.writer == Some(me) {
            return Err(HgReturn::Busy);
        }
        while st.writer.is_some() || st.readers > 0 {
            self.released.wait(&mut st);
        }
        st.writer = Some(me);
        Ok(())
    }

    /// Releases the write lock if the caller holds it, otherwise one read lock.
    pub fn unlock(&self) -> HgResult<()> {
        let mut st = self.state.lock();
        if st.writer == Some(me()) {
            st.writer = None;
        } else if st.readers > 0 {
            st.readers -= 1;
        } else {
            return Err(HgReturn::Permission);
        }
        self.released.notify_all();
        Ok(())
    }
}

/// `ABT_thread_yield`.
pub fn thread_yield() {
    std::thread::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn test_recursive_mutex_counts_depth() {
        let m = Mutex::new(true);
        m.lock().unwrap();
        m.lock().unwrap();
        m.unlock().unwrap();
        assert!(m.try_lock());
        m.unlock().unwrap();
        m.unlock().unwrap();
        assert_eq!(m.unlock(), Err(HgReturn::Permission));
    }

    #[test]
    fn test_plain_mutex_refuses_self_relock() {
        let m = Mutex::new(false);
        m.lock().unwrap();
        assert_eq!(m.lock(), Err(HgReturn::Busy));
        assert!(!m.try_lock());
        m.unlock().unwrap();
    }

    #[test]
    fn test_unlock_from_other_thread_is_refused() {
        let m = Arc::new(Mutex::new(false));
        m.lock().unwrap();
        let other = m.clone();
        let ret = std::thread::spawn(move || other.unlock()).join().unwrap();
        assert_eq!(ret, Err(HgReturn::Permission));
        m.unlock().unwrap();
    }

    #[test]
    fn test_rwlock_readers_then_writer() {
        let l = Arc::new(RwLock::new());
        l.read_lock().unwrap();
        l.read_lock().unwrap();

        let writer = {
            let l = l.clone();
            std::thread::spawn(move || {
                l.write_lock().unwrap();
                l.unlock().unwrap();
            })
        };
        l.unlock().unwrap();
        l.unlock().unwrap();
        writer.join().unwrap();
        assert_eq!(l.unlock(), Err(HgReturn::Permission));
    }
}
