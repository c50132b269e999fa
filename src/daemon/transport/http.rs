//! Streamable HTTP connection handle

use std::sync::atomic::{AtomicBool, Ordering};

use crate::daemon::transport::Transport;
use crate::error::{ProofworkError, Result};

/// A logical connection identified by its `mcp-session-id` header.
///
/// There is no socket to tear down between requests, so closing only marks
/// the connection so later requests on the same id are refused.
#[derive(Debug)]
pub struct HttpConnectionTransport {
    connection_id: String,
    client_name: Option<String>,
    closed: AtomicBool,
}

impl HttpConnectionTransport {
    pub fn new(connection_id: impl Into<String>, client_name: Option<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            client_name: client_name.filter(|n| !n.trim().is_empty()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for HttpConnectionTransport {
    fn client_info(&self) -> Option<String> {
        self.client_name.clone()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ProofworkError::Transport(format!(
                "connection {} already closed",
                self.connection_id
            ))
            .into());
        }
        Ok(())
    }
}
