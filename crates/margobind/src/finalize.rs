//! Finalize callbacks. The engine runs them on whichever thread finalizes;
//! each one is bridged back under the interpreter lock. A callback error is
//! logged through the engine and does not stop the remaining callbacks.

use hgcore::LogLevel;
use hgcore::RawInstance;

use crate::dispatch::fatal_on_panic;
use crate::engine::Engine;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;
use crate::gil::with_interpreter;

fn bridge<F>(mid: RawInstance, stage: &'static str, callback: F) -> hgcore::FinalizeCallback
where
    F: for<'py> FnOnce(Gil<'py>) -> anyhow::Result<()> + Send + 'static,
{
    Box::new(move || {
        let outcome = fatal_on_panic(stage, || with_interpreter(callback));
        if let Err(e) = outcome {
            hgcore::log::log(Some(mid), LogLevel::Error, &format!("{} callback failed: {:#}", stage, e));
        }
    })
}

impl Engine {
    /// Runs `callback` at the start of finalization, while the engine can
    /// still send and receive.
    pub fn on_prefinalize<F>(&self, callback: F) -> Result<()>
    where
        F: for<'py> FnOnce(Gil<'py>) -> anyhow::Result<()> + Send + 'static,
    {
        let mid = self.mid();
        hgcore::push_prefinalize_callback(mid, bridge(mid, "prefinalize", callback)).op("push_prefinalize_callback")
    }

    /// Runs `callback` once progress has stopped.
    pub fn on_finalize<F>(&self, callback: F) -> Result<()>
    where
        F: for<'py> FnOnce(Gil<'py>) -> anyhow::Result<()> + Send + 'static,
    {
        let mid = self.mid();
        hgcore::push_finalize_callback(mid, bridge(mid, "finalize", callback)).op("push_finalize_callback")
    }
}
