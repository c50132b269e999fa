//! Connection transports owned by the session manager
//!
//! The manager only needs two things from a transport: who the client is,
//! and a way to close the connection when the entry is cleaned up. Wire
//! framing stays with the HTTP layer in [`crate::daemon::server`].
//!
//! - [`http::HttpConnectionTransport`] -- one logical connection multiplexed
//!   over `POST /mcp` by its `mcp-session-id` header.
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).

use crate::error::Result;

/// A client connection as seen by the session manager.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Client name announced by the peer, if any.
    ///
    /// Takes precedence over environment-based client detection.
    fn client_info(&self) -> Option<String>;

    /// Close the connection.
    ///
    /// Callers treat failures as non-fatal; a transport may report an error
    /// when the peer is already gone.
    async fn close(&self) -> Result<()>;
}

pub mod http;

#[cfg(test)]
pub mod fake;
