//! # Engine Configuration
//!
//! The init arguments seed an [`EngineConfig`]; an optional JSON document
//! then overrides any field it names. The effective configuration can be
//! dumped back out as JSON for inspection.

use serde::Deserialize;
use serde::Serialize;

use crate::ret::HgResult;
use crate::ret::HgReturn;

/// Handlers run on the progress runtime.
pub const RPC_IN_PROGRESS_THREAD: i32 = -1;
/// Handlers run in the context of the caller that drives progress.
pub const RPC_IN_CALLER_THREAD: i32 = 0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Advisory. Every instance drives progress on its own `hg-progress`
    /// runtime; the flag is kept so configurations round-trip.
    pub use_progress_thread: bool,
    /// `-1`: progress runtime, `0`: caller thread, `n > 0`: dedicated pool of `n`.
    pub rpc_thread_count: i32,
    pub handle_cache_size: usize,
    pub progress_timeout_ub_msec: u64,
    pub enable_remote_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_progress_thread: false,
            rpc_thread_count: RPC_IN_CALLER_THREAD,
            handle_cache_size: 32,
            progress_timeout_ub_msec: 100,
            enable_remote_shutdown: false,
        }
    }
}

/// Partial view used for overrides: only fields present in the JSON apply.
#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct Overrides {
    use_progress_thread: Option<bool>,
    rpc_thread_count: Option<i32>,
    handle_cache_size: Option<usize>,
    progress_timeout_ub_msec: Option<u64>,
    enable_remote_shutdown: Option<bool>,
}

impl EngineConfig {
    pub fn new(use_progress_thread: bool, rpc_thread_count: i32) -> Self {
        Self {
            use_progress_thread,
            rpc_thread_count,
            ..Self::default()
        }
    }

    /// Applies a JSON document on top of this configuration.
    /// An empty string leaves the configuration untouched.
    pub fn apply_json(mut self, json: &str) -> HgResult<Self> {
        if json.trim().is_empty() {
            return Ok(self);
        }
        let o: Overrides = serde_json::from_str(json).map_err(|e| {
            tracing::error!(error = %e, "invalid engine json configuration");
            HgReturn::InvalidArg
        })?;
        if let Some(v) = o.use_progress_thread { self.use_progress_thread = v; }
        if let Some(v) = o.rpc_thread_count { self.rpc_thread_count = v; }
        if let Some(v) = o.handle_cache_size { self.handle_cache_size = v; }
        if let Some(v) = o.progress_timeout_ub_msec { self.progress_timeout_ub_msec = v; }
        if let Some(v) = o.enable_remote_shutdown { self.enable_remote_shutdown = v; }
        if self.rpc_thread_count < RPC_IN_PROGRESS_THREAD {
            return Err(HgReturn::InvalidArg);
        }
        Ok(self)
    }

    /// Number of threads in a dedicated handler pool, if one is requested.
    pub fn dedicated_rpc_threads(&self) -> Option<usize> {
        usize::try_from(self.rpc_thread_count).ok().filter(|n| *n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_overrides_only_named_fields() {
        let cfg = EngineConfig::new(true, 2)
            .apply_json(r#"{"handle_cache_size": 8}"#)
            .unwrap();
        assert!(cfg.use_progress_thread);
        assert_eq!(cfg.rpc_thread_count, 2);
        assert_eq!(cfg.handle_cache_size, 8);
        assert_eq!(cfg.dedicated_rpc_threads(), Some(2));
    }

    #[test]
    fn test_json_rejects_garbage_and_unknown_fields() {
        assert_eq!(EngineConfig::default().apply_json("{"), Err(HgReturn::InvalidArg));
        assert_eq!(
            EngineConfig::default().apply_json(r#"{"bogus": 1}"#),
            Err(HgReturn::InvalidArg)
        );
        assert_eq!(
            EngineConfig::default().apply_json(r#"{"rpc_thread_count": -7}"#),
            Err(HgReturn::InvalidArg)
        );
    }

    #[test]
    fn test_caller_and_progress_locations_have_no_pool() {
        assert_eq!(EngineConfig::new(false, RPC_IN_CALLER_THREAD).dedicated_rpc_threads(), None);
        assert_eq!(EngineConfig::new(true, RPC_IN_PROGRESS_THREAD).dedicated_rpc_threads(), None);
    }
}
