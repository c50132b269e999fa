//! Error types for Proofwork
//!
//! This module defines the error types used throughout the daemon,
//! using `thiserror` for ergonomic error handling.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Proofwork operations
///
/// Recoverable faults (missing signing key, chain relocation failure,
/// transport close failure) never surface as errors; they are logged and
/// swallowed at the call site. Everything here propagates to the caller.
#[derive(Error, Debug)]
pub enum ProofworkError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hash chain errors (broken linkage, unreadable records)
    #[error("Chain error: {0}")]
    Chain(String),

    /// Keystore or signature errors
    #[error("Signing error: {0}")]
    Signing(String),

    /// Session or milestone index errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// An index file exists but does not contain a valid JSON array
    #[error("Corrupt index {path}: {source}")]
    CorruptIndex {
        /// Path of the offending index file
        path: PathBuf,
        /// Underlying parse error
        source: serde_json::Error,
    },

    /// `end` was called without an active session
    #[error("No active session to end")]
    SessionNotActive,

    /// No live connection is registered under the given id
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Transport-level failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed protocol input rejected at the boundary
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Proofwork operations
///
/// Uses `anyhow::Error` so call sites can attach context; typed
/// [`ProofworkError`] values are recovered with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
