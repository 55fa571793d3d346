//! # Engine
//!
//! Owns one engine instance. Dropping an [`Engine`] that was not finalized
//! finalizes it. Registration, bulk, finalize-callback and logging
//! operations live in their own modules as further `impl Engine` blocks.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use hgcore::Mode;
use hgcore::RawInstance;

use crate::address::Address;
use crate::capsule::OpaqueRef;
use crate::error::Error;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;

/// Where the engine runs RPC handlers.
///
/// The in-process engine always has a progress runtime, so both locations
/// run handlers on its blocking pool; they differ only in the recorded
/// `rpc_thread_count`. `EngineOptions::rpc_threads` gives a dedicated pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DispatchLocation {
    CallerThread,
    ProgressThread,
}

impl DispatchLocation {
    fn rpc_thread_count(self) -> i32 {
        match self {
            Self::CallerThread => hgcore::RPC_IN_CALLER_THREAD,
            Self::ProgressThread => hgcore::RPC_IN_PROGRESS_THREAD,
        }
    }
}

/// Init arguments. `config` fields override the others, the way the
/// engine's JSON configuration does.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub mode: Mode,
    pub use_progress_thread: bool,
    pub rpc_thread_count: i32,
    pub config: Option<serde_json::Value>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            use_progress_thread: false,
            rpc_thread_count: hgcore::RPC_IN_CALLER_THREAD,
            config: None,
        }
    }
}

impl EngineOptions {
    pub fn client() -> Self {
        Self { mode: Mode::Client, ..Self::default() }
    }

    pub fn server() -> Self {
        Self::default()
    }

    pub fn use_progress_thread(mut self, enabled: bool) -> Self {
        self.use_progress_thread = enabled;
        self
    }

    pub fn dispatch(mut self, location: DispatchLocation) -> Self {
        self.rpc_thread_count = location.rpc_thread_count();
        self
    }

    /// Runs handlers on a dedicated pool of `n` threads.
    pub fn rpc_threads(mut self, n: u16) -> Self {
        self.rpc_thread_count = i32::from(n);
        self
    }

    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

pub struct Engine {
    mid: RawInstance,
    finalized: AtomicBool,
}

impl Engine {
    /// Starts an engine listening on `addr` (a protocol such as `"na+sm"`,
    /// or a full address).
    pub fn new(addr: &str, options: EngineOptions) -> Result<Self> {
        let config = match &options.config {
            None => String::new(),
            Some(object @ serde_json::Value::Object(_)) => object.to_string(),
            Some(other) => {
                return Err(Error::InvalidArgument(format!("engine config must be an object, got {}", other)));
            }
        };
        let mid = hgcore::init(
            addr,
            options.mode,
            options.use_progress_thread,
            options.rpc_thread_count,
            &config,
        )
        .op("init")?;
        tracing::debug!(%mid, addr, "engine started");
        Ok(Self { mid, finalized: AtomicBool::new(false) })
    }

    pub(crate) fn mid(&self) -> RawInstance {
        self.mid
    }

    pub fn id(&self) -> OpaqueRef {
        OpaqueRef::instance(self.mid)
    }

    /// Whether `r` refers to this engine.
    pub fn is(&self, r: OpaqueRef) -> bool {
        r.as_instance().is_ok_and(|mid| mid == self.mid)
    }

    pub fn finalize(&self, gil: Gil<'_>) -> Result<()> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mid = self.mid;
        gil.allow_native(|| hgcore::finalize(mid)).op("finalize")
    }

    /// Blocks until the engine is finalized, e.g. by a remote shutdown.
    pub fn wait_for_finalize(&self, gil: Gil<'_>) -> Result<()> {
        let mid = self.mid;
        gil.allow_native(|| hgcore::wait_for_finalize(mid)).op("wait_for_finalize")?;
        self.finalized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn listening(&self) -> Result<bool> {
        hgcore::is_listening(self.mid).op("is_listening")
    }

    pub fn address(&self) -> Result<Address> {
        let raw = hgcore::addr_self(self.mid).op("addr_self")?;
        Ok(Address::owned(self.mid, raw))
    }

    pub fn lookup(&self, uri: &str) -> Result<Address> {
        let raw = hgcore::addr_lookup(self.mid, uri).op("addr_lookup")?;
        Ok(Address::owned(self.mid, raw))
    }

    /// Hints that `address` is no longer valid.
    pub fn set_remove(&self, address: &Address) -> Result<()> {
        hgcore::addr_set_remove(self.mid, address.raw()).op("addr_set_remove")
    }

    pub fn enable_remote_shutdown(&self) -> Result<()> {
        hgcore::enable_remote_shutdown(self.mid).op("enable_remote_shutdown")
    }

    /// Suspends the calling thread with the interpreter lock released.
    pub fn sleep(&self, gil: Gil<'_>, timeout: Duration) -> Result<()> {
        let mid = self.mid;
        gil.allow_native(|| hgcore::thread_sleep(mid, timeout)).op("thread_sleep")
    }

    /// Effective engine configuration.
    pub fn config(&self) -> Result<serde_json::Value> {
        let dump = hgcore::config_dump(self.mid).op("config_dump")?;
        Ok(serde_json::from_str(&dump)?)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(code) = hgcore::finalize(self.mid) {
            tracing::warn!(mid = %self.mid, error = %code, "finalize on drop failed");
        }
    }
}
