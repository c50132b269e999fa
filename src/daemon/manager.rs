//! Connection multiplexing and idle-timeout sealing
//!
//! The [`SessionManager`] owns one [`ConnectionEntry`] per live connection:
//! its transport, its [`SessionState`] and its idle timer. Every inbound
//! operation re-arms the timer. When the timer fires on a connection with
//! unsealed data the session is auto-sealed and reset in place; the
//! connection itself stays open.
//!
//! Cleanup removes the entry from the map before doing anything else, so a
//! second cleanup for the same id finds nothing and returns immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{decrement_gauge, increment_gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chain::AppendedRecord;
use crate::daemon::transport::Transport;
use crate::error::{ProofworkError, Result};
use crate::session::{
    EndRequest, SealOutcome, SealTrigger, SessionOptions, SessionPhase, SessionSnapshot,
    SessionState,
};
use crate::storage::SessionStore;

/// Inactivity after which a connection's session is auto-sealed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Payload of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    /// Chain files currently in `active/`
    pub active_sessions: usize,
    /// Live connections
    pub mcp_connections: usize,
    pub uptime_seconds: u64,
}

/// A record appended through the manager, with the session it landed in.
///
/// Both halves are taken under the same lock, so a concurrent request on the
/// connection cannot change the session in between.
#[derive(Debug, Clone)]
pub struct RecordReceipt {
    pub record: AppendedRecord,
    pub session: SessionSnapshot,
}

/// One live connection
#[derive(Debug)]
pub struct ConnectionEntry {
    id: String,
    transport: Arc<dyn Transport>,
    state: tokio::sync::Mutex<SessionState>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.idle_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_idle_timer(&self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.abort();
        }
    }
}

/// Owns every live connection of the daemon
#[derive(Debug)]
pub struct SessionManager {
    connections: Mutex<HashMap<String, Arc<ConnectionEntry>>>,
    store: Arc<SessionStore>,
    options: SessionOptions,
    idle_timeout: Duration,
    started: Instant,
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>, options: SessionOptions) -> Arc<Self> {
        Self::with_idle_timeout(store, options, IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(
        store: Arc<SessionStore>,
        options: SessionOptions,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            store,
            options,
            idle_timeout,
            started: Instant::now(),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, Arc<ConnectionEntry>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new connection and arm its idle timer.
    pub fn register(
        self: &Arc<Self>,
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<ConnectionEntry>> {
        let id = id.into();
        let state = SessionState::new(
            Arc::clone(&self.store),
            self.options.clone(),
            transport.client_info(),
        );
        let entry = Arc::new(ConnectionEntry {
            id: id.clone(),
            transport,
            state: tokio::sync::Mutex::new(state),
            idle_timer: Mutex::new(None),
        });

        {
            let mut connections = self.connections();
            if connections.contains_key(&id) {
                return Err(
                    ProofworkError::Protocol(format!("connection {} already registered", id))
                        .into(),
                );
            }
            connections.insert(id.clone(), Arc::clone(&entry));
        }

        increment_gauge!("proofwork_connections", 1.0);
        info!(connection_id = %id, client = ?entry.transport.client_info(), "Connection registered");
        self.arm_idle_timer(&entry);
        Ok(entry)
    }

    /// Look up a live connection.
    pub fn entry(&self, id: &str) -> Result<Arc<ConnectionEntry>> {
        self.connections()
            .get(id)
            .cloned()
            .ok_or_else(|| ProofworkError::UnknownConnection(id.to_string()).into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections().contains_key(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    /// Run `f` against the connection's session state without touching the
    /// idle timer.
    pub async fn with_state<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> Result<R> {
        let entry = self.entry(id)?;
        let mut state = entry.state.lock().await;
        Ok(f(&mut state))
    }

    pub async fn phase(&self, id: &str) -> Result<SessionPhase> {
        self.with_state(id, |state| state.phase()).await
    }

    /// Reset the idle timer for an inbound operation.
    pub fn touch(self: &Arc<Self>, id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        self.arm_idle_timer(&entry);
        Ok(())
    }

    /// Start a session on the connection, nesting it under a running one.
    ///
    /// # Arguments
    ///
    /// * `id` - Connection id
    /// * `task_type` - Task type to record, `coding` when `None`
    ///
    /// # Returns
    ///
    /// The `session_start` record and a snapshot of the new session.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` for an unregistered id, or the chain
    /// error if the record could not be written.
    pub async fn start(
        self: &Arc<Self>,
        id: &str,
        task_type: Option<String>,
    ) -> Result<RecordReceipt> {
        let entry = self.entry(id)?;
        self.arm_idle_timer(&entry);
        let mut state = entry.state.lock().await;
        let record = state.start(task_type)?;
        Ok(RecordReceipt {
            record,
            session: state.snapshot(),
        })
    }

    /// Record a heartbeat, starting a session first if none is active.
    pub async fn heartbeat(self: &Arc<Self>, id: &str) -> Result<RecordReceipt> {
        let entry = self.entry(id)?;
        self.arm_idle_timer(&entry);
        let mut state = entry.state.lock().await;
        let record = state.heartbeat()?;
        Ok(RecordReceipt {
            record,
            session: state.snapshot(),
        })
    }

    /// End the connection's current session, then resume its parent if the
    /// session was nested.
    pub async fn end(self: &Arc<Self>, id: &str, request: EndRequest) -> Result<SealOutcome> {
        let entry = self.entry(id)?;
        self.arm_idle_timer(&entry);
        let mut state = entry.state.lock().await;
        let outcome = state.end(request)?;
        if state.restore_parent_state() {
            debug!(connection_id = %id, session_id = %state.session_id(), "Resumed parent session");
        }
        Ok(outcome)
    }

    fn arm_idle_timer(self: &Arc<Self>, entry: &Arc<ConnectionEntry>) {
        // Deadline is fixed here, not when the task is first polled
        let deadline = tokio::time::Instant::now() + self.idle_timeout;
        let manager: Weak<Self> = Arc::downgrade(self);
        let id = entry.id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(manager) = manager.upgrade() {
                manager.on_idle_timeout(&id).await;
            }
        });

        if let Some(previous) = entry.timer_slot().replace(handle) {
            previous.abort();
        }
    }

    /// Auto-seal a connection that sat idle past the timeout. The
    /// connection stays registered with a fresh session state.
    pub async fn on_idle_timeout(&self, id: &str) {
        let Ok(entry) = self.entry(id) else {
            return;
        };
        let mut state = entry.state.lock().await;
        if !state.has_unsealed_data() {
            debug!(connection_id = %id, "Idle timeout with nothing to seal");
            return;
        }

        match state.auto_seal(SealTrigger::IdleTimeout) {
            Ok(outcomes) => info!(
                connection_id = %id,
                sealed = outcomes.len(),
                "Auto-sealed idle session"
            ),
            Err(e) => error!(connection_id = %id, error = %e, "Idle auto-seal failed"),
        }
    }

    /// Tear down a connection: cancel its timer, seal unsealed data and
    /// close the transport.
    ///
    /// The entry leaves the map first, so calling this again, or racing it
    /// against an idle-timeout seal, seals nothing twice. Seal and close
    /// failures are logged and do not keep the entry alive.
    ///
    /// # Arguments
    ///
    /// * `id` - Connection id given to [`SessionManager::register`]
    ///
    /// # Returns
    ///
    /// `true` if the connection was live and is now gone, `false` when the
    /// id was unknown or already cleaned up.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use proofwork::daemon::transport::http::HttpConnectionTransport;
    /// use proofwork::daemon::SessionManager;
    /// use proofwork::session::SessionOptions;
    /// use proofwork::storage::SessionStore;
    ///
    /// # async fn run() -> anyhow::Result<()> {
    /// let store = Arc::new(SessionStore::open("/tmp/proofwork")?);
    /// let manager = SessionManager::new(store, SessionOptions::default());
    /// let transport = Arc::new(HttpConnectionTransport::new("c1".to_string(), None));
    /// manager.register("c1", transport)?;
    /// manager.heartbeat("c1").await?;
    ///
    /// assert!(manager.cleanup("c1").await);
    /// assert!(!manager.cleanup("c1").await);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cleanup(&self, id: &str) -> bool {
        let Some(entry) = self.connections().remove(id) else {
            debug!(connection_id = %id, "Cleanup for unknown connection ignored");
            return false;
        };
        decrement_gauge!("proofwork_connections", 1.0);
        entry.cancel_idle_timer();

        {
            let mut state = entry.state.lock().await;
            if state.has_unsealed_data() {
                if let Err(e) = state.auto_seal(SealTrigger::Cleanup) {
                    warn!(connection_id = %id, error = %e, "Auto-seal during cleanup failed");
                }
            }
        }

        if let Err(e) = entry.transport.close().await {
            debug!(connection_id = %id, error = %e, "Ignoring transport close failure");
        }

        info!(connection_id = %id, "Connection cleaned up");
        true
    }

    /// Clean up every live connection. Returns how many were drained.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.connections().keys().cloned().collect();
        let drained = join_all(ids.iter().map(|id| self.cleanup(id)))
            .await
            .into_iter()
            .filter(|cleaned| *cleaned)
            .count();
        info!(drained, "Session manager shut down");
        drained
    }

    pub fn health(&self) -> HealthReport {
        let active_sessions = self.store.count_active_chains().unwrap_or_else(|e| {
            warn!(error = %e, "Could not count active chains");
            0
        });
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            active_sessions,
            mcp_connections: self.connection_count(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::transport::fake::FakeTransport;
    use tempfile::TempDir;

    fn manager() -> (Arc<SessionManager>, Arc<SessionStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let manager = SessionManager::new(Arc::clone(&store), SessionOptions::default());
        (manager, store, dir)
    }

    fn seal_count(store: &SessionStore) -> usize {
        store.load_sessions().unwrap().len()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fires_at_threshold() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(Some("cursor"))))
            .unwrap();
        manager.start("c1", None).await.unwrap();

        tokio::time::advance(IDLE_TIMEOUT - Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(seal_count(&store), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        let seals = store.load_sessions().unwrap();
        assert_eq!(seals.len(), 1);
        assert!(seals[0].summary.auto_sealed);
        assert_eq!(seals[0].summary.client, "cursor");

        assert!(manager.contains("c1"));
        assert_eq!(manager.phase("c1").await.unwrap(), SessionPhase::Idle);

        tokio::time::advance(IDLE_TIMEOUT * 2).await;
        settle().await;
        assert_eq!(seal_count(&store), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_restarts_countdown() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager.start("c1", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        settle().await;
        manager.heartbeat("c1").await.unwrap();

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        settle().await;
        assert_eq!(seal_count(&store), 0);

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        settle().await;
        assert_eq!(seal_count(&store), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_without_data_does_nothing() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();

        tokio::time::advance(IDLE_TIMEOUT).await;
        settle().await;
        assert_eq!(seal_count(&store), 0);
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (manager, store, _dir) = manager();
        let transport = Arc::new(FakeTransport::new(None));
        manager.register("c1", transport.clone()).unwrap();
        manager.start("c1", None).await.unwrap();
        manager.heartbeat("c1").await.unwrap();

        assert!(manager.cleanup("c1").await);
        assert_eq!(seal_count(&store), 1);
        assert_eq!(transport.close_calls(), 1);
        assert_eq!(store.count_active_chains().unwrap(), 0);

        assert!(!manager.cleanup("c1").await);
        assert_eq!(seal_count(&store), 1);
        assert_eq!(transport.close_calls(), 1);
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_ignores_close_failure() {
        let (manager, store, _dir) = manager();
        let transport = Arc::new(FakeTransport::failing_close(None));
        manager.register("c1", transport.clone()).unwrap();
        manager.start("c1", None).await.unwrap();

        assert!(manager.cleanup("c1").await);
        assert_eq!(transport.close_calls(), 1);
        assert!(!manager.contains("c1"));
        assert_eq!(seal_count(&store), 1);
    }

    #[tokio::test]
    async fn test_cleanup_without_data_does_not_seal() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();
        assert!(manager.cleanup("c1").await);
        assert_eq!(seal_count(&store), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_idle_timer() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager.start("c1", None).await.unwrap();
        manager.cleanup("c1").await;

        tokio::time::advance(IDLE_TIMEOUT * 2).await;
        settle().await;
        assert_eq!(seal_count(&store), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cleanup_seals_once() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager.start("c1", None).await.unwrap();

        let (a, b) = tokio::join!(manager.cleanup("c1"), manager.cleanup("c1"));
        assert!(a ^ b);
        assert_eq!(seal_count(&store), 1);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_rejected() {
        let (manager, _store, _dir) = manager();
        let err = manager.start("missing", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProofworkError>(),
            Some(ProofworkError::UnknownConnection(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let (manager, _store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();
        assert!(manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .is_err());
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_nested_end_resumes_parent() {
        let (manager, store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager.start("c1", Some("feature".into())).await.unwrap();
        manager.start("c1", Some("debugging".into())).await.unwrap();

        let inner = manager.end("c1", EndRequest::default()).await.unwrap();
        assert_eq!(inner.seal.summary.task_type, "debugging");
        assert_eq!(manager.phase("c1").await.unwrap(), SessionPhase::Active);

        let outer = manager.end("c1", EndRequest::default()).await.unwrap();
        assert_eq!(outer.seal.summary.task_type, "feature");
        assert_eq!(seal_count(&store), 2);
    }

    #[tokio::test]
    async fn test_start_receipt_describes_the_new_session() {
        let (manager, _store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(Some("cursor"))))
            .unwrap();
        let outer = manager.start("c1", Some("feature".into())).await.unwrap();
        let inner = manager.start("c1", Some("debugging".into())).await.unwrap();

        assert_eq!(outer.record.seq, 1);
        assert_eq!(outer.session.parent_depth, 0);
        assert_eq!(inner.record.seq, 1);
        assert_eq!(inner.session.task_type, "debugging");
        assert_eq!(inner.session.client, "cursor");
        assert_eq!(inner.session.parent_depth, 1);
        assert_ne!(inner.session.session_id, outer.session.session_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_heartbeats_report_their_own_count() {
        let (manager, _store, _dir) = manager();
        manager
            .register("c1", Arc::new(FakeTransport::new(None)))
            .unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.heartbeat("c1").await.unwrap() })
            })
            .collect();
        let mut receipts = Vec::new();
        for task in tasks {
            receipts.push(task.await.unwrap());
        }

        let mut counts: Vec<u32> = receipts.iter().map(|r| r.session.heartbeat_count).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
        // seq 1 is the implicit session_start
        assert!(receipts
            .iter()
            .all(|r| r.record.seq == u64::from(r.session.heartbeat_count) + 1));
        let first = &receipts[0].session.session_id;
        assert!(receipts.iter().all(|r| &r.session.session_id == first));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_connections_are_isolated() {
        let (manager, _store, _dir) = manager();
        manager
            .register("a", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager
            .register("b", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager.start("a", None).await.unwrap();
        manager.heartbeat("a").await.unwrap();

        assert_eq!(manager.phase("a").await.unwrap(), SessionPhase::Active);
        assert_eq!(manager.phase("b").await.unwrap(), SessionPhase::Idle);
        let beats = manager.with_state("a", |s| s.heartbeat_count()).await.unwrap();
        assert_eq!(beats, 1);
    }

    #[tokio::test]
    async fn test_health_reports_connections_and_active_chains() {
        let (manager, _store, _dir) = manager();
        manager
            .register("a", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager
            .register("b", Arc::new(FakeTransport::new(None)))
            .unwrap();
        manager.start("a", None).await.unwrap();

        let health = manager.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(health.mcp_connections, 2);
        assert_eq!(health.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_connections() {
        let (manager, store, _dir) = manager();
        for id in ["a", "b", "c"] {
            manager
                .register(id, Arc::new(FakeTransport::new(None)))
                .unwrap();
        }
        manager.start("a", None).await.unwrap();
        manager.start("b", None).await.unwrap();

        assert_eq!(manager.shutdown().await, 3);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(seal_count(&store), 2);
        assert_eq!(store.count_active_chains().unwrap(), 0);
    }
}
