/*!
# Nebula 3D Engine

Core types for the Nebula 3D rendering engine.

This crate provides the platform-agnostic pieces shared by every render
backend: error types, the logging system, and the device-independent
rendering value types (raster state, render pass parameters, sampler
parameters, pixel transfer descriptors, capacity limits).

Backend implementations (such as `nebula_3d_engine_renderer_vulkan`)
translate these types into native GPU state.
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod render;

// Main nebula3d namespace module
pub mod nebula3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine services (logging host)
    pub use crate::engine::Engine;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they live at the crate root
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::render::*;
    }
}
