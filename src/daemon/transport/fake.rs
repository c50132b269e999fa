//! In-process fake transport for manager tests
//!
//! Counts `close` calls and can be told to fail them, so tests can observe
//! that cleanup closes exactly once and tolerates close errors.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::daemon::transport::Transport;
use crate::error::{ProofworkError, Result};

#[derive(Debug, Default)]
pub struct FakeTransport {
    client: Option<String>,
    fail_close: AtomicBool,
    close_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new(client: Option<&str>) -> Self {
        Self {
            client: client.map(str::to_string),
            ..Default::default()
        }
    }

    /// A transport whose `close` always errors.
    pub fn failing_close(client: Option<&str>) -> Self {
        let transport = Self::new(client);
        transport.fail_close.store(true, Ordering::SeqCst);
        transport
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    fn client_info(&self) -> Option<String> {
        self.client.clone()
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProofworkError::Transport("peer went away".into()).into());
        }
        Ok(())
    }
}
