//! Sealing chains orphaned by a previous daemon process
//!
//! A daemon that exits without draining its connections leaves chain logs in
//! `active/`. At startup each one is verified and sealed as
//! [`SealTrigger::Recovery`], with `ended_at` taken from the last recorded
//! activity rather than the restart time.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::chain::HashChain;
use crate::error::Result;
use crate::session::{SealTrigger, SessionOptions, SessionState};
use crate::storage::SessionStore;

/// What happened to the chains found in `active/`
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Session ids sealed during recovery
    pub sealed: Vec<String>,
    /// Chains already sealed whose file only needed moving
    pub relocated: Vec<String>,
    /// Chains left in place, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Seal or relocate every chain still sitting in `active/`.
///
/// Only live connections own active chains, so this must run before the
/// daemon accepts any.
///
/// # Arguments
///
/// * `store` - Store whose `active/` directory is scanned
/// * `options` - Signing key and milestone settings for the recovery seals
///
/// # Returns
///
/// A [`RecoveryReport`]. Chains that fail verification or do not begin with
/// `session_start` are left where they are and listed in `skipped`.
///
/// # Errors
///
/// Returns an error if `active/` cannot be listed or a seal cannot be
/// written to the index.
pub fn recover_orphaned_chains(
    store: &Arc<SessionStore>,
    options: &SessionOptions,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for path in store.active_chain_files()? {
        let (mut chain, records) = match HashChain::open_existing(&path) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unverifiable chain");
                report.skipped.push((path, e.to_string()));
                continue;
            }
        };

        if records.is_empty() {
            report.skipped.push((path, "empty chain".to_string()));
            continue;
        }

        let session_id = chain.session_id().to_string();
        let already_sealed = records
            .iter()
            .any(|r| matches!(r.payload, crate::chain::RecordPayload::SessionSeal(_)));
        if already_sealed {
            match chain.relocate(store.sealed_dir()) {
                Ok(_) => report.relocated.push(session_id),
                Err(e) => report.skipped.push((path, e.to_string())),
            }
            continue;
        }

        let mut state =
            match SessionState::resume(Arc::clone(store), options.clone(), chain, &records) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping chain without session_start");
                    report.skipped.push((path, e.to_string()));
                    continue;
                }
            };

        state.auto_seal(SealTrigger::Recovery)?;
        report.sealed.push(session_id);
    }

    if !report.sealed.is_empty() || !report.relocated.is_empty() {
        info!(
            sealed = report.sealed.len(),
            relocated = report.relocated.len(),
            skipped = report.skipped.len(),
            "Recovered orphaned chains"
        );
    }
    Ok(report)
}
