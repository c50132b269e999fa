//! Test utilities for proofwork
//!
//! This module provides common test utilities: throwaway data directories,
//! configuration pointing at them, and assertion helpers.

use crate::config::Config;
use crate::error::ProofworkError;
use crate::storage::SessionStore;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Create a temporary directory for testing
///
/// The directory is removed when the returned `TempDir` is dropped.
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Open a session store in a fresh temporary directory
///
/// Keep the returned `TempDir` alive for as long as the store is used.
pub fn temp_store() -> (Arc<SessionStore>, TempDir) {
    let dir = temp_dir();
    let store = SessionStore::open(dir.path()).expect("Failed to open session store");
    (Arc::new(store), dir)
}

/// Default configuration with its data directory set to `data_dir`
pub fn test_config(data_dir: &Path) -> Config {
    Config {
        data_dir: Some(data_dir.to_path_buf()),
        ..Config::default()
    }
}

/// Assert that an error is a [`ProofworkError`] whose message contains
/// `expected`
///
/// # Panics
///
/// Panics if the error is another type or the message does not match
pub fn assert_proofwork_error_contains(error: &anyhow::Error, expected: &str) {
    match error.downcast_ref::<ProofworkError>() {
        Some(e) => assert!(
            e.to_string().contains(expected),
            "Expected error containing '{}', got '{}'",
            expected,
            e
        ),
        None => panic!("Expected ProofworkError, got {:?}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_store_layout() {
        let (store, dir) = temp_store();
        assert_eq!(store.root(), dir.path());
        assert!(store.active_dir().is_dir());
        assert!(store.sealed_dir().is_dir());
    }

    #[test]
    fn test_config_points_at_data_dir() {
        let dir = temp_dir();
        let config = test_config(dir.path());
        assert_eq!(config.resolved_data_dir().unwrap(), dir.path());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_assert_proofwork_error_contains() {
        let err: anyhow::Error = ProofworkError::Config("bad port".into()).into();
        assert_proofwork_error_contains(&err, "bad port");
    }
}
