//! Core types and utilities

pub mod types;
pub mod error;

pub use types::*;
pub use error::Error;

/// Initialize logging for binaries and tests that want output
///
/// Filters at `info` unless RUST_LOG overrides; safe to call more than
/// once.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .ok();
}
