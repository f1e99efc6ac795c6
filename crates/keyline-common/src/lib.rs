//! Shared utilities for Keyline: logging, error types, defaults.
//!
//! This crate provides common infrastructure used across all Keyline components.

#![forbid(unsafe_code)]

pub mod error;

pub use error::{Error, Result};

/// Default TCP port the server listens on and the client dials.
pub const DEFAULT_PORT: u16 = 12345;

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Operator consoles own stdout, so log lines go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
