//! The long-running session daemon
//!
//! - `manager`   -- connection map, idle timers, cleanup and health
//! - `protocol`  -- JSON-RPC wire types and the `start`/`heartbeat`/`end` tools
//! - `server`    -- axum routes
//! - `transport` -- the connection abstraction the manager closes

pub mod manager;
pub mod protocol;
pub mod server;
pub mod transport;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::chain::signing::Keystore;
use crate::config::Config;
use crate::error::Result;
use crate::session::recovery::recover_orphaned_chains;
use crate::session::SessionOptions;
use crate::storage::SessionStore;

pub use manager::{HealthReport, RecordReceipt, SessionManager, IDLE_TIMEOUT};

/// Build the per-session options from configuration.
///
/// A missing or unreadable keystore never stops the daemon; seals are
/// produced unsigned instead.
pub fn session_options(config: &Config, store: &SessionStore) -> SessionOptions {
    let signing_key = if config.tracking.signing {
        match Keystore::load_or_create(&store.keystore_path()).and_then(|ks| ks.signing_key()) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Keystore unavailable, seals will be unsigned");
                None
            }
        }
    } else {
        info!("Signing disabled, seals will be unsigned");
        None
    };

    SessionOptions {
        signing_key,
        milestone_tracking: config.tracking.milestone_tracking,
    }
}

/// Run the daemon until Ctrl-C, then seal every open session.
pub async fn run(config: &Config) -> Result<()> {
    let data_dir = config.resolved_data_dir()?;
    let store = Arc::new(
        SessionStore::open(&data_dir)
            .with_context(|| format!("opening data directory {}", data_dir.display()))?,
    );
    let options = session_options(config, &store);

    let report = recover_orphaned_chains(&store, &options)?;
    for (path, reason) in &report.skipped {
        warn!(path = %path.display(), reason = %reason, "Chain left in active/");
    }

    let manager = SessionManager::new(Arc::clone(&store), options);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(data_dir = %data_dir.display(), "proofwork daemon started");
    let served = server::serve(listener, Arc::clone(&manager), server::shutdown_signal()).await;

    manager.shutdown().await;
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_store;

    #[test]
    fn test_session_options_signing_creates_keystore() {
        let (store, _dir) = temp_store();
        let options = session_options(&Config::default(), &store);
        assert!(options.signing_key.is_some());
        assert!(options.milestone_tracking);
        assert!(store.keystore_path().exists());
    }

    #[test]
    fn test_session_options_degrade_on_corrupt_keystore() {
        let (store, _dir) = temp_store();
        std::fs::write(store.keystore_path(), "{ broken").unwrap();
        let options = session_options(&Config::default(), &store);
        assert!(options.signing_key.is_none());
    }

    #[test]
    fn test_session_options_signing_disabled() {
        let (store, _dir) = temp_store();
        let mut config = Config::default();
        config.tracking.signing = false;
        config.tracking.milestone_tracking = false;
        let options = session_options(&config, &store);
        assert!(options.signing_key.is_none());
        assert!(!options.milestone_tracking);
        assert!(!store.keystore_path().exists());
    }
}
