//! # Interpreter Lock
//!
//! One process-wide lock serializes all interpreted code. A [`Gil`] token
//! proves the current thread holds it; interpreted callables take the token
//! as their first argument so they cannot run without it.
//!
//! Two crossings exist:
//!
//! - [`with_interpreter`]: a native thread is about to run interpreted code.
//!   Acquires the lock (or re-enters it if this thread already holds it).
//! - [`Gil::allow_native`]: interpreted code is about to block in native
//!   code. Releases the lock for the duration and reacquires it on every
//!   exit path, unwinding included.
//!
//! Blocking while holding the lock stalls every other interpreted caller,
//! and a native thread that waits on the lock holder while the holder waits
//! on it deadlocks. Every blocking engine call in this crate therefore goes
//! through `allow_native`.

use std::cell::Cell;
use std::marker::PhantomData;
use std::thread::ThreadId;

use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::const_mutex;

struct InterpreterLock {
    owner: Mutex<Option<ThreadId>>,
    free: Condvar,
}

static LOCK: InterpreterLock = InterpreterLock {
    owner: const_mutex(None),
    free: Condvar::new(),
};

thread_local! {
    /// Nesting depth of `with_interpreter` on this thread; zero when not held.
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn acquire() {
    let me = std::thread::current().id();
    let mut owner = LOCK.owner.lock();
    while owner.is_some() {
        LOCK.free.wait(&mut owner);
    }
    *owner = Some(me);
}

/// Gives the lock up if the current thread owns it. Returns whether it did.
fn release() -> bool {
    let me = std::thread::current().id();
    let mut owner = LOCK.owner.lock();
    if *owner != Some(me) {
        return false;
    }
    *owner = None;
    drop(owner);
    LOCK.free.notify_one();
    true
}

/// Proof that the current thread holds the interpreter lock.
///
/// Neither `Send` nor `Sync`: it cannot leave the thread that acquired it.
#[derive(Copy, Clone)]
pub struct Gil<'py> {
    _marker: PhantomData<(&'py (), *const ())>,
}

impl<'py> Gil<'py> {
    /// Runs `f` with the lock released, reacquiring it before returning.
    ///
    /// `f` must be `Send`, which keeps the token out of it: nothing inside
    /// can reach interpreted state while another thread holds the lock.
    ///
    /// ```compile_fail
    /// margobind::with_interpreter(|gil| gil.allow_native(|| gil.allow_native(|| ())));
    /// ```
    pub fn allow_native<T>(self, f: impl FnOnce() -> T + Send) -> T {
        struct Reacquire(usize);

        impl Drop for Reacquire {
            fn drop(&mut self) {
                acquire();
                DEPTH.with(|d| d.set(self.0));
            }
        }

        let depth = DEPTH.with(|d| d.get());
        if depth == 0 || !release() {
            return f();
        }
        DEPTH.with(|d| d.set(0));
        let _reacquire = Reacquire(depth);
        f()
    }
}

/// Runs `f` while holding the interpreter lock. Re-entrant per thread.
pub fn with_interpreter<R>(f: impl for<'py> FnOnce(Gil<'py>) -> R) -> R {
    struct Leave;

    impl Drop for Leave {
        fn drop(&mut self) {
            let depth = DEPTH.with(|d| {
                let depth = d.get() - 1;
                d.set(depth);
                depth
            });
            if depth == 0 {
                release();
            }
        }
    }

    if DEPTH.with(|d| d.get()) == 0 {
        acquire();
    }
    DEPTH.with(|d| d.set(d.get() + 1));
    let _leave = Leave;
    f(Gil { _marker: PhantomData })
}

/// Whether the current thread holds the interpreter lock.
pub fn is_held() -> bool {
    DEPTH.with(|d| d.get()) > 0
}
