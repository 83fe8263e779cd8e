/// Nebula3D Engine - Global engine services
///
/// This module hosts the engine-wide logging sink used by the `engine_*`
/// macros. It uses thread-safe static storage with RwLock for safe
/// concurrent access from any subsystem (including the render backend).

use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Engine-wide service access point
///
/// All logging performed through the `engine_trace!` .. `engine_error!`
/// macros is routed through this type to the currently installed logger.
///
/// # Example
///
/// ```no_run
/// use nebula_3d_engine::nebula3d::Engine;
/// use nebula_3d_engine::nebula3d::log::{Logger, LogEntry};
///
/// struct FileLogger;
/// impl Logger for FileLogger {
///     fn log(&self, entry: &LogEntry) {
///         // Write to file...
///     }
/// }
///
/// Engine::set_logger(FileLogger);
/// ```
pub struct Engine;

impl Engine {
    /// Set a custom logger
    ///
    /// Replace the default logger with a custom implementation (file logger,
    /// network logger, test capture logger, etc.)
    ///
    /// # Arguments
    ///
    /// * `logger` - Any type implementing the Logger trait
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(mut lock) = logger_lock.write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to default (DefaultLogger)
    pub fn reset_logger() {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(mut lock) = logger_lock.write() {
            *lock = Box::new(DefaultLogger);
        }
    }

    /// Internal logging method (for simple logs without file:line)
    ///
    /// Used by macros like engine_info!, engine_warn!, etc.
    ///
    /// # Arguments
    ///
    /// * `severity` - Log severity level
    /// * `source` - Source module (e.g., "nebula3d::vulkan")
    /// * `message` - Log message
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(lock) = logger_lock.read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Internal logging method with file:line information (for ERROR logs)
    ///
    /// Used by engine_error! macro to include source location.
    ///
    /// # Arguments
    ///
    /// * `severity` - Log severity level (typically Error)
    /// * `source` - Source module (e.g., "nebula3d::vulkan")
    /// * `message` - Log message
    /// * `file` - Source file path
    /// * `line` - Source line number
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(lock) = logger_lock.read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
