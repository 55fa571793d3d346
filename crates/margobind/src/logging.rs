//! # Logging Bridge
//!
//! Engine log events can be routed to an interpreted [`Logger`], either
//! process-wide or per engine. The engine calls its sink from whichever
//! thread emitted the event, so the bridge enters the interpreter first.
//!
//! Without an installed logger, events become `tracing` events; call
//! [`init_tracing`] to see them.

use std::sync::Arc;

use hgcore::LogLevel;
use hgcore::LogSink;
use hgcore::RawInstance;
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;
use crate::gil::with_interpreter;

/// An interpreted log receiver.
pub trait Logger: Send + Sync + 'static {
    fn trace(&self, gil: Gil<'_>, message: &str);
    fn debug(&self, gil: Gil<'_>, message: &str);
    fn info(&self, gil: Gil<'_>, message: &str);
    fn warning(&self, gil: Gil<'_>, message: &str);
    fn error(&self, gil: Gil<'_>, message: &str);
    fn critical(&self, gil: Gil<'_>, message: &str);
}

struct Bridge {
    logger: Option<Arc<dyn Logger>>,
}

impl Bridge {
    fn sink(logger: Arc<dyn Logger>) -> Arc<dyn LogSink> {
        Arc::new(Self { logger: Some(logger) })
    }
}

impl LogSink for Bridge {
    fn log(&self, level: LogLevel, message: &str) {
        let Some(logger) = &self.logger else { return };
        with_interpreter(|gil| match level {
            LogLevel::Trace => logger.trace(gil, message),
            LogLevel::Debug => logger.debug(gil, message),
            LogLevel::Info | LogLevel::External => logger.info(gil, message),
            LogLevel::Warning => logger.warning(gil, message),
            LogLevel::Error => logger.error(gil, message),
            LogLevel::Critical => logger.critical(gil, message),
        });
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(logger) = self.logger.take() {
            with_interpreter(|_| drop(logger));
        }
    }
}

/// Installs the process-wide logger, or with `None` restores `tracing` output.
pub fn set_global_logger(logger: Option<Arc<dyn Logger>>) {
    hgcore::log::set_global_logger(logger.map(Bridge::sink));
}

pub fn set_global_log_level(level: LogLevel) {
    hgcore::log::set_global_log_level(level);
}

pub fn trace(message: &str) {
    hgcore::log::log(None, LogLevel::Trace, message);
}

pub fn debug(message: &str) {
    hgcore::log::log(None, LogLevel::Debug, message);
}

pub fn info(message: &str) {
    hgcore::log::log(None, LogLevel::Info, message);
}

pub fn warning(message: &str) {
    hgcore::log::log(None, LogLevel::Warning, message);
}

pub fn error(message: &str) {
    hgcore::log::log(None, LogLevel::Error, message);
}

pub fn critical(message: &str) {
    hgcore::log::log(None, LogLevel::Critical, message);
}

/// Logging routed through one engine.
#[derive(Copy, Clone, Debug)]
pub struct EngineLogger {
    mid: RawInstance,
}

impl EngineLogger {
    pub fn set_logger(&self, logger: Option<Arc<dyn Logger>>) -> Result<()> {
        hgcore::log::set_logger(self.mid, logger.map(Bridge::sink)).op("set_logger")
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        hgcore::log::set_log_level(self.mid, level).op("set_log_level")
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        hgcore::log::log(Some(self.mid), level, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }
}

impl Engine {
    pub fn logger(&self) -> EngineLogger {
        EngineLogger { mid: self.mid() }
    }
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`. A no-op when a
/// global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
