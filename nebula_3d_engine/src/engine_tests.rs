use super::*;
use crate::log::{LogEntry, LogSeverity, Logger};
use serial_test::serial;
use std::sync::{Arc, Mutex};

/// Logger that records every entry it receives
struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn install_capture_logger() -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(CaptureLogger {
        entries: entries.clone(),
    });
    entries
}

// Tests share the global logger slot, so they run serially.

#[test]
#[serial]
fn test_log_routes_to_installed_logger() {
    let entries = install_capture_logger();

    Engine::log(LogSeverity::Info, "nebula3d::test", "hello".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].source, "nebula3d::test");
    assert_eq!(captured[0].message, "hello");
    assert!(captured[0].file.is_none());
    assert!(captured[0].line.is_none());

    drop(captured);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_log_detailed_carries_file_and_line() {
    let entries = install_capture_logger();

    Engine::log_detailed(
        LogSeverity::Error,
        "nebula3d::vulkan",
        "boom".to_string(),
        "vulkan_runtime.rs",
        99,
    );

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);
    assert_eq!(captured[0].file, Some("vulkan_runtime.rs"));
    assert_eq!(captured[0].line, Some(99));

    drop(captured);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_macros_route_through_engine() {
    let entries = install_capture_logger();

    crate::engine_info!("nebula3d::test", "count = {}", 3);
    crate::engine_warn!("nebula3d::test", "slow frame");
    crate::engine_error!("nebula3d::test", "failure: {}", "oops");

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 3);
    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].message, "count = 3");
    assert_eq!(captured[1].severity, LogSeverity::Warn);
    assert_eq!(captured[2].severity, LogSeverity::Error);
    // engine_error! records the call site
    assert!(captured[2].file.is_some());
    assert!(captured[2].line.is_some());

    drop(captured);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_err_builds_backend_error() {
    let entries = install_capture_logger();

    let err = crate::engine_err!("nebula3d::test", "submit failed: {}", 12);
    match err {
        crate::error::Error::BackendError(msg) => assert_eq!(msg, "submit failed: 12"),
        other => panic!("expected BackendError, got {:?}", other),
    }

    // The macro also logged the message
    assert_eq!(entries.lock().unwrap().len(), 1);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_bail_returns_early() {
    install_capture_logger();

    fn failing() -> crate::error::Result<u32> {
        crate::engine_bail!("nebula3d::test", "bad state");
        #[allow(unreachable_code)]
        Ok(0)
    }

    assert!(failing().is_err());
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_reset_logger_restores_default() {
    let entries = install_capture_logger();
    Engine::reset_logger();

    // After reset, the capture logger no longer receives entries
    Engine::log(LogSeverity::Info, "nebula3d::test", "ignored".to_string());
    assert_eq!(entries.lock().unwrap().len(), 0);
}
