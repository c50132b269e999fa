//! proofwork - tamper-evident tracking of AI-assisted coding sessions
//!
//! This library provides the core of the proofwork daemon: an append-only
//! hash chain per session, the session lifecycle on top of it, a daemon that
//! multiplexes many client connections with idle-timeout sealing, and the
//! scoring pipeline that turns sealed sessions into an AI Proficiency Score.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `chain`: Hash-chained JSONL session logs and seal signing
//! - `session`: Session lifecycle, nesting, sealing and orphan recovery
//! - `storage`: Data directory layout and the seal and milestone indexes
//! - `daemon`: Connection manager, JSON-RPC tools and HTTP routes
//! - `scoring`: Evaluation frameworks and the APS composer
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use proofwork::session::{EndRequest, SessionOptions, SessionState};
//! use proofwork::storage::SessionStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SessionStore::open("/tmp/proofwork")?);
//!     let mut session = SessionState::new(store, SessionOptions::default(), None);
//!     session.start(Some("refactor".to_string()))?;
//!     session.heartbeat()?;
//!     let outcome = session.end(EndRequest::default())?;
//!     println!("sealed {}", outcome.seal.session_id());
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod scoring;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use chain::HashChain;
pub use config::Config;
pub use daemon::SessionManager;
pub use error::{ProofworkError, Result};
pub use session::SessionState;

#[cfg(test)]
pub mod test_utils;
