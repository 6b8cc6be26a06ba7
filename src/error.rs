//! Crate-wide error type for fallible setup paths.
//!
//! The hot per-connection event path does not use this type: it keeps returning
//! `std::io::Result` / `crate::rpc::ParseResult`, matching the narrow external interfaces the
//! state machine is built against. `ServerError` covers the things that can only go wrong once,
//! before the reactor starts: loading configuration, binding the listener, starting workers.

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error for the server binary and any setup helpers the library exposes.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The request grammar could not be parsed (surfaced here only for setup-time validation
    /// helpers; the per-connection path reports this through `ParseResult` instead).
    #[error("invalid request: {0}")]
    Parse(String),

    /// A buffered header exceeded `MAX_RPC_HEADER_LEN` with no frame boundary in sight.
    #[error("oversized request header ({len} bytes, limit {limit})")]
    OversizedHeader {
        /// Bytes buffered so far.
        len: usize,
        /// The configured limit that was exceeded.
        limit: usize,
    },

    /// Wraps any I/O failure from binding, accepting, or reading configuration files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration failed to load or did not pass validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
