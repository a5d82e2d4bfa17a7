//! Shared utilities for Murmur: wire protocol, logging, error types.
//!
//! This crate provides common infrastructure used by both the relay and the
//! client. It carries no cryptography: every binary field on the wire is an
//! opaque base64 string at this layer.

#![forbid(unsafe_code)]

pub mod error;
pub mod names;
pub mod protocol;

pub use error::{Error, Result};
pub use names::{is_valid_name, normalize_name};
pub use protocol::*;

/// Initialize tracing with a specific default level.
///
/// The `RUST_LOG` environment variable takes precedence when set.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
