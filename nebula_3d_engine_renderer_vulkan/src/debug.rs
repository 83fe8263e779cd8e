/// Vulkan Debug Messenger - Handles validation layer messages with colored output
///
/// Installed on the instance when validation is enabled. Messages are
/// printed to the console and counted so tests and teardown code can
/// assert on a clean validation run.

use ash::vk;
use colored::*;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Global debug configuration (shared across callbacks)
static DEBUG_CONFIG: Mutex<Option<Config>> = Mutex::new(None);

/// Global validation statistics (thread-safe atomic counters)
static VALIDATION_STATS: ValidationStatsTracker = ValidationStatsTracker::new();

/// Global message tracker for grouping identical messages
static MESSAGE_TRACKER: Mutex<Option<MessageTracker>> = Mutex::new(None);

/// Debug configuration for the callback
#[derive(Clone)]
pub struct Config {
    pub panic_on_error: bool,
}

/// Snapshot of validation message counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

/// Thread-safe validation statistics tracker
struct ValidationStatsTracker {
    errors: AtomicU32,
    warnings: AtomicU32,
    info: AtomicU32,
    verbose: AtomicU32,
}

impl ValidationStatsTracker {
    const fn new() -> Self {
        Self {
            errors: AtomicU32::new(0),
            warnings: AtomicU32::new(0),
            info: AtomicU32::new(0),
            verbose: AtomicU32::new(0),
        }
    }

    fn get_stats(&self) -> ValidationStats {
        ValidationStats {
            errors: self.errors.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            info: self.info.load(Ordering::Relaxed),
            verbose: self.verbose.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.errors.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);
        self.info.store(0, Ordering::Relaxed);
        self.verbose.store(0, Ordering::Relaxed);
    }
}

/// Message tracker for grouping identical messages
struct MessageTracker {
    messages: HashMap<String, u32>,
}

impl MessageTracker {
    fn track_message(&mut self, message: &str) -> u32 {
        let count = self.messages.entry(message.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Initialize debug configuration and reset counters
pub fn init_debug_config(config: Config) {
    VALIDATION_STATS.reset();

    *MESSAGE_TRACKER.lock().unwrap() = Some(MessageTracker {
        messages: HashMap::new(),
    });

    *DEBUG_CONFIG.lock().unwrap() = Some(config);
}

/// Get current validation statistics
pub fn get_validation_stats() -> ValidationStats {
    VALIDATION_STATS.get_stats()
}

/// Print validation statistics report
pub fn print_validation_stats_report() {
    let stats = get_validation_stats();

    if stats.total() == 0 {
        println!("\n{}", "✓ No validation messages".green().bold());
        return;
    }

    println!("\n{}", "=== Validation Statistics Report ===".bright_blue().bold());

    if stats.errors > 0 {
        println!("  {} {}", "Errors:".red().bold(), stats.errors);
    }
    if stats.warnings > 0 {
        println!("  {} {}", "Warnings:".yellow().bold(), stats.warnings);
    }
    if stats.info > 0 {
        println!("  {} {}", "Info:".cyan(), stats.info);
    }
    if stats.verbose > 0 {
        println!("  {} {}", "Verbose:".bright_black(), stats.verbose);
    }

    println!("  {} {}", "Total:".white().bold(), stats.total());

    let tracker_guard = MESSAGE_TRACKER.lock().unwrap();
    if let Some(tracker) = tracker_guard.as_ref() {
        let duplicate_count =
            tracker.messages.values().filter(|&&count| count > 1).count();

        if duplicate_count > 0 {
            println!("\n  {} {} message(s) appeared multiple times",
                "ℹ".cyan(),
                duplicate_count
            );
        }
    }

    println!("{}\n", "====================================".bright_blue().bold());
}

/// Vulkan debug messenger callback
///
/// Called by the validation layers. Formats the message with colors,
/// counts it, and optionally panics on errors in strict mode.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_name = if callback_data.p_message_id_name.is_null() {
        "Unknown"
    } else {
        CStr::from_ptr(callback_data.p_message_id_name)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };
    let message = if callback_data.p_message.is_null() {
        "No message"
    } else {
        CStr::from_ptr(callback_data.p_message)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };

    let config_guard = DEBUG_CONFIG.lock().unwrap();
    let config = match config_guard.as_ref() {
        Some(cfg) => cfg.clone(),
        None => return vk::FALSE, // No config, ignore
    };
    drop(config_guard);

    // Determine severity level and color, increment statistics
    let severity_colored =
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            VALIDATION_STATS.errors.fetch_add(1, Ordering::Relaxed);
            "ERROR".red().bold()
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            VALIDATION_STATS.warnings.fetch_add(1, Ordering::Relaxed);
            "WARNING".yellow().bold()
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            VALIDATION_STATS.info.fetch_add(1, Ordering::Relaxed);
            "INFO".cyan()
        } else {
            VALIDATION_STATS.verbose.fetch_add(1, Ordering::Relaxed);
            "VERBOSE".bright_black()
        };

    let type_str = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    };

    // Track message for grouping
    let occurrence_count = {
        let mut tracker_guard = MESSAGE_TRACKER.lock().unwrap();
        if let Some(tracker) = tracker_guard.as_mut() {
            tracker.track_message(message)
        } else {
            *tracker_guard = Some(MessageTracker {
                messages: HashMap::new(),
            });
            tracker_guard.as_mut().unwrap().track_message(message)
        }
    };

    let repeat_indicator = if occurrence_count > 1 {
        format!(" [×{}]", occurrence_count)
    } else {
        String::new()
    };

    eprint!(
        "{} {} [{}]{}\n  ├─ {}: {}\n  └─ {}\n",
        "[VULKAN".bright_blue().bold(),
        format!("{}]", severity_colored).bright_blue().bold(),
        type_str.bright_black(),
        repeat_indicator.yellow(),
        "Message ID".bright_black(),
        message_id_name.white(),
        message.white()
    );

    // Panic on any error if strict mode enabled
    if config.panic_on_error
        && message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
    {
        panic!(
            "\n⚠️  PANIC ON ERROR (Strict Mode)\n\
            Message ID: {}\n\
            Type: {}\n\
            Message: {}\n",
            message_id_name, type_str, message
        );
    }

    vk::FALSE // Don't abort Vulkan execution
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_stats_reset_on_init() {
        VALIDATION_STATS.errors.fetch_add(3, Ordering::Relaxed);
        init_debug_config(Config {
            panic_on_error: false,
        });
        assert_eq!(get_validation_stats(), ValidationStats::default());
    }

    #[test]
    #[serial]
    fn test_stats_total() {
        let stats = ValidationStats {
            errors: 1,
            warnings: 2,
            info: 3,
            verbose: 4,
        };
        assert_eq!(stats.total(), 10);
    }
}
