//! # Engine Logging
//!
//! Log events are filtered by a threshold (per instance, or process-wide for
//! events without an instance) and handed to an installed [`LogSink`].
//! Without a sink they become `tracing` events.
//!
//! Sinks are always invoked with no engine lock held: a sink may block or
//! call back into the engine.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;

use crate::instance;
use crate::ret::HgResult;
use crate::types::LogLevel;
use crate::types::RawInstance;

/// Receives log events that passed the level threshold.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, level: LogLevel, message: &str);
}

pub(crate) struct LogState {
    sink: RwLock<Option<Arc<dyn LogSink>>>,
    level: AtomicU8,
}

impl LogState {
    pub(crate) fn new() -> Self {
        Self {
            sink: RwLock::new(None),
            level: AtomicU8::new(LogLevel::Warning as u8),
        }
    }

    fn set_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        let previous = std::mem::replace(&mut *self.sink.write(), sink);
        drop(previous);
    }

    fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level as u8 >= self.level.load(Ordering::Relaxed)
    }

    fn emit(&self, scope: &str, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => sink.log(level, message),
            None => to_tracing(scope, level, message),
        }
    }
}

static GLOBAL: LazyLock<LogState> = LazyLock::new(LogState::new);

fn to_tracing(scope: &str, level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(scope, "{}", message),
        LogLevel::Debug => tracing::debug!(scope, "{}", message),
        LogLevel::Info | LogLevel::External => tracing::info!(scope, "{}", message),
        LogLevel::Warning => tracing::warn!(scope, "{}", message),
        LogLevel::Error => tracing::error!(scope, "{}", message),
        LogLevel::Critical => tracing::error!(scope, critical = true, "{}", message),
    }
}

/// Installs (or with `None`, removes) the process-wide sink.
pub fn set_global_logger(sink: Option<Arc<dyn LogSink>>) {
    GLOBAL.set_sink(sink);
}

pub fn set_global_log_level(level: LogLevel) {
    GLOBAL.set_level(level);
}

/// Installs (or removes) the sink of one instance.
pub fn set_logger(mid: RawInstance, sink: Option<Arc<dyn LogSink>>) -> HgResult<()> {
    let inst = instance::get(mid)?;
    inst.log.set_sink(sink);
    Ok(())
}

pub fn set_log_level(mid: RawInstance, level: LogLevel) -> HgResult<()> {
    let inst = instance::get(mid)?;
    inst.log.set_level(level);
    Ok(())
}

/// Emits an event through an instance's logger, or the global one for `None`.
///
/// Events addressed to an instance that is gone fall back to the global logger.
pub fn log(mid: Option<RawInstance>, level: LogLevel, message: &str) {
    let inst = mid.and_then(|m| instance::get(m).ok());
    match inst {
        Some(inst) => inst.log.emit(&inst.uri, level, message),
        None => GLOBAL.emit("global", level, message),
    }
}

/// Engine-internal shorthand.
pub(crate) fn emit(mid: RawInstance, level: LogLevel, message: impl AsRef<str>) {
    log(Some(mid), level, message.as_ref());
}
