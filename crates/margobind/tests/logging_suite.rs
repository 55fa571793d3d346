//! Engine log events delivered to interpreted loggers.

use std::sync::Arc;

use margobind::Engine;
use margobind::EngineOptions;
use margobind::Gil;
use margobind::LogLevel;
use margobind::Logger;
use margobind::gil;
use margobind::logging;
use margobind::with_interpreter;
use parking_lot::Mutex;

#[derive(Default)]
struct Journal {
    lines: Mutex<Vec<String>>,
}

impl Journal {
    fn record(&self, level: &str, message: &str) {
        assert!(gil::is_held(), "logger called without the interpreter lock");
        self.lines.lock().push(format!("{level}: {message}"));
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl Logger for Journal {
    fn trace(&self, _: Gil<'_>, message: &str) {
        self.record("trace", message);
    }

    fn debug(&self, _: Gil<'_>, message: &str) {
        self.record("debug", message);
    }

    fn info(&self, _: Gil<'_>, message: &str) {
        self.record("info", message);
    }

    fn warning(&self, _: Gil<'_>, message: &str) {
        self.record("warning", message);
    }

    fn error(&self, _: Gil<'_>, message: &str) {
        self.record("error", message);
    }

    fn critical(&self, _: Gil<'_>, message: &str) {
        self.record("critical", message);
    }
}

#[test]
fn test_engine_logger_levels() {
    logging::init_tracing();
    let engine = Engine::new("na+sm", EngineOptions::server()).unwrap();
    let journal = Arc::new(Journal::default());
    let logger = engine.logger();
    logger.set_logger(Some(journal.clone() as Arc<dyn Logger>)).unwrap();

    // The default threshold is warning.
    logger.info("quiet");
    logger.warning("loud");
    logger.critical("louder");
    assert_eq!(journal.take(), ["warning: loud", "critical: louder"]);

    logger.set_log_level(LogLevel::Trace).unwrap();
    logger.trace("t");
    logger.debug("d");
    logger.error("e");
    assert_eq!(journal.take(), ["trace: t", "debug: d", "error: e"]);

    // External passes everything and reaches the logger as info.
    logger.set_log_level(LogLevel::External).unwrap();
    logger.log(LogLevel::External, "from outside");
    assert_eq!(journal.take(), ["info: from outside"]);

    // Re-entrant: logging while already holding the lock.
    with_interpreter(|_| logger.error("nested"));
    assert_eq!(journal.take(), ["error: nested"]);

    logger.set_logger(None).unwrap();
    logger.error("to tracing");
    assert!(journal.take().is_empty());
}

#[test]
fn test_handler_failures_reach_the_engine_logger() {
    let server = Engine::new("na+sm", EngineOptions::server()).unwrap();
    let client = Engine::new("na+sm", EngineOptions::client()).unwrap();
    let journal = Arc::new(Journal::default());
    server.logger().set_logger(Some(journal.clone() as Arc<dyn Logger>)).unwrap();
    server.register("grumpy", 0, |_, _, _| anyhow::bail!("not today")).unwrap();
    server
        .on_finalize(|_| anyhow::bail!("cleanup went wrong"))
        .unwrap();

    let target = client.lookup(&server.address().unwrap().to_uri().unwrap()).unwrap();
    let grumpy = client.register_client_only("grumpy", 0).unwrap().on(&target, 0).unwrap();
    assert!(with_interpreter(|gil| grumpy.call(gil, b"")).is_err());

    let lines = journal.take();
    assert!(
        lines.iter().any(|l| l.starts_with("error: ") && l.contains("not today")),
        "{lines:?}"
    );

    with_interpreter(|gil| server.finalize(gil)).unwrap();
    let lines = journal.take();
    assert!(lines.iter().any(|l| l.contains("cleanup went wrong")), "{lines:?}");
}

#[test]
fn test_global_logger() {
    let journal = Arc::new(Journal::default());
    logging::set_global_logger(Some(journal.clone() as Arc<dyn Logger>));
    logging::set_global_log_level(LogLevel::Info);

    logging::debug("hidden");
    logging::info("shown");
    logging::critical("alarm");
    assert_eq!(journal.take(), ["info: shown", "critical: alarm"]);

    logging::set_global_logger(None);
    logging::warning("to tracing");
    assert!(journal.take().is_empty());
    assert_eq!(Arc::strong_count(&journal), 1);
}
