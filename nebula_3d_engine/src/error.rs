//! Error types for the Nebula3D engine
//!
//! This module defines the error types used throughout the engine,
//! including rendering, initialization, and resource management.

use std::fmt;

/// Result type for Nebula3D engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nebula3D engine errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan driver failures, device loss, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, program, etc.)
    InvalidResource(String),

    /// Caller contract violation (binding out of range, draw without shaders, etc.)
    InvalidPrecondition(String),

    /// Initialization failed (engine, renderer, subsystems)
    InitializationFailed(String),

    /// Swap chain no longer matches the surface and must be recreated
    SwapChainOutOfDate,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InvalidPrecondition(msg) => write!(f, "Invalid precondition: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::SwapChainOutOfDate => write!(f, "Swap chain out of date"),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
