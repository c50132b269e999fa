use std::sync::Arc;
use tempfile::TempDir;
use proofwork::session::{SessionOptions, SessionState};
use proofwork::storage::SessionStore;

#[allow(dead_code)]
pub fn create_temp_store() -> (Arc<SessionStore>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = SessionStore::open(tmp.path()).expect("failed to open session store");
    (Arc::new(store), tmp)
}

#[allow(dead_code)]
pub fn new_session(store: &Arc<SessionStore>, options: SessionOptions) -> SessionState {
    SessionState::new(Arc::clone(store), options, Some("claude-code".to_string()))
}

#[allow(dead_code)]
pub fn tracking_options() -> SessionOptions {
    SessionOptions {
        signing_key: None,
        milestone_tracking: true,
    }
}
