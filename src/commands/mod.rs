/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `serve`  - run the session daemon
- `score`  - compute the AI Proficiency Score from the session index
- `verify` - re-walk a session's chain and check its seal
*/

use crate::config::Config;
use crate::error::Result;
use crate::storage::SessionStore;

fn open_store(config: &Config) -> Result<SessionStore> {
    SessionStore::open(config.resolved_data_dir()?)
}

// Daemon command handler
pub mod serve {
    //! Runs the daemon until interrupted.

    use super::*;

    /// Start the daemon with the loaded configuration.
    pub async fn run_serve(config: Config) -> Result<()> {
        tracing::info!(
            host = %config.server.host,
            port = config.server.port,
            "Starting session daemon"
        );
        crate::daemon::run(&config).await
    }
}

// Score command handler
pub mod score {
    //! Reads `sessions.json` and `milestones.json` and prints the APS.

    use super::*;
    use crate::error::ProofworkError;
    use crate::scoring::{
        compute_local_aps, compute_streak_days, framework_by_id, ApsScore, EvaluationFramework,
    };
    use chrono::NaiveDate;
    use serde::Serialize;

    /// An APS together with the history it was computed from
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct ScoreReport {
        #[serde(flatten)]
        pub aps: ApsScore,
        pub sessions: usize,
        pub milestones: usize,
        pub streak_days: u32,
    }

    /// Score everything in the store as of `today` (UTC).
    pub fn score_store(
        store: &SessionStore,
        framework: &dyn EvaluationFramework,
        today: NaiveDate,
    ) -> Result<ScoreReport> {
        let sessions = store.load_sessions()?;
        let milestones = store.load_milestones()?;
        let streak_days = compute_streak_days(&sessions, today);
        let aps = compute_local_aps(&sessions, &milestones, streak_days, framework);
        Ok(ScoreReport {
            aps,
            sessions: sessions.len(),
            milestones: milestones.len(),
            streak_days,
        })
    }

    pub fn run_score(config: Config, json: bool) -> Result<()> {
        let framework_id = &config.tracking.evaluation_framework;
        let framework = framework_by_id(framework_id).ok_or_else(|| {
            ProofworkError::Config(format!("Unknown evaluation framework: {}", framework_id))
        })?;
        let store = open_store(&config)?;
        let report = score_store(&store, framework.as_ref(), chrono::Utc::now().date_naive())?;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let c = &report.aps.components;
        println!(
            "AI Proficiency Score: {} / 1000 ({})",
            report.aps.score,
            framework.name()
        );
        println!("  output          {:.2}", c.output);
        println!("  efficiency      {:.2}", c.efficiency);
        println!("  prompt quality  {:.2}", c.prompt_quality);
        println!("  consistency     {:.2}", c.consistency);
        println!("  breadth         {:.2}", c.breadth);
        println!(
            "{} sessions, {} milestones, {} day streak",
            report.sessions, report.milestones, report.streak_days
        );
        Ok(())
    }
}

// Verify command handler
pub mod verify {
    //! Integrity check for one session.
    //!
    //! The chain file is looked up in `sealed/` first, then `active/`. Every
    //! hash is recomputed, the seal text is compared against the chain it
    //! closes, and the signature is checked against the local keystore.

    use super::*;
    use crate::chain::signing::{verify_json, Keystore, UNSIGNED};
    use crate::chain::{read_records, verify_records, ChainVerification, RecordPayload};
    use crate::error::ProofworkError;
    use crate::storage::SealSummary;
    use std::path::PathBuf;

    /// Result of checking a seal signature
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignatureStatus {
        Valid,
        Invalid,
        /// Sealed without a key
        Unsigned,
        /// Signed, but there is no local keystore to check against
        NoKey,
        /// The chain has no `session_seal` record
        NotSealed,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct VerifyReport {
        pub session_id: String,
        pub path: PathBuf,
        pub chain: ChainVerification,
        /// Seal's record count and end hash match the chain it closes
        pub seal_consistent: bool,
        pub signature: SignatureStatus,
        /// The seal appears in `sessions.json`
        pub indexed: bool,
    }

    impl VerifyReport {
        pub fn is_ok(&self) -> bool {
            self.chain.is_valid()
                && self.seal_consistent
                && matches!(
                    self.signature,
                    SignatureStatus::Valid | SignatureStatus::Unsigned
                )
        }
    }

    fn chain_path(store: &SessionStore, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty()
            || session_id.contains(['/', '\\'])
            || session_id.contains("..")
        {
            return Err(ProofworkError::Storage(format!("Invalid session id: {}", session_id)).into());
        }
        let file = format!("{}.jsonl", session_id);
        [store.sealed_dir().join(&file), store.active_dir().join(&file)]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                ProofworkError::Storage(format!("No chain found for session {}", session_id))
                    .into()
            })
    }

    /// Check one session's chain, seal and signature.
    ///
    /// # Arguments
    ///
    /// * `store` - Store holding the chain and the local keystore
    /// * `session_id` - Id of the session, as listed in `sessions.json`
    ///
    /// # Returns
    ///
    /// A [`VerifyReport`]; [`VerifyReport::is_ok`] summarizes it.
    ///
    /// # Errors
    ///
    /// Fails for ids that could escape the data directory, when no chain
    /// file exists, or when the keystore is unreadable.
    pub fn verify_session(store: &SessionStore, session_id: &str) -> Result<VerifyReport> {
        let path = chain_path(store, session_id)?;
        let records = read_records(&path)?;
        let chain = verify_records(&records)?;

        let seal = records
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, record)| match &record.payload {
                RecordPayload::SessionSeal(data) => Some((index, data)),
                _ => None,
            });

        let (seal_consistent, signature) = match seal {
            None => (false, SignatureStatus::NotSealed),
            Some((index, data)) => {
                let consistent = match serde_json::from_str::<SealSummary>(&data.seal) {
                    Ok(summary) => {
                        index > 0
                            && summary.record_count == records[index - 1].seq
                            && summary.chain_end_hash == records[index - 1].hash
                    }
                    Err(_) => false,
                };
                (consistent, check_signature(store, &data.seal, &data.seal_signature)?)
            }
        };

        let indexed = store
            .load_sessions()?
            .iter()
            .any(|s| s.session_id() == session_id);

        Ok(VerifyReport {
            session_id: session_id.to_string(),
            path,
            chain,
            seal_consistent,
            signature,
            indexed,
        })
    }

    fn check_signature(store: &SessionStore, seal: &str, signature: &str) -> Result<SignatureStatus> {
        if signature == UNSIGNED {
            return Ok(SignatureStatus::Unsigned);
        }
        let keystore_path = store.keystore_path();
        if !keystore_path.exists() {
            return Ok(SignatureStatus::NoKey);
        }
        let key = Keystore::load(&keystore_path)?.verifying_key()?;
        Ok(if verify_json(seal, signature, &key) {
            SignatureStatus::Valid
        } else {
            SignatureStatus::Invalid
        })
    }

    pub fn run_verify(config: Config, session_id: String) -> Result<()> {
        let store = open_store(&config)?;
        let report = verify_session(&store, &session_id)?;

        println!("Session:    {}", report.session_id);
        println!("Chain file: {}", report.path.display());
        println!("Records:    {}", report.chain.record_count);
        match report.chain.first_invalid_seq {
            None => println!("Chain:      intact (tip {})", report.chain.tip_hash),
            Some(seq) => println!("Chain:      BROKEN at seq {}", seq),
        }
        println!(
            "Seal:       {}",
            if report.seal_consistent { "consistent" } else { "missing or inconsistent" }
        );
        println!("Signature:  {:?}", report.signature);
        println!("Indexed:    {}", report.indexed);

        if report.is_ok() {
            Ok(())
        } else {
            Err(ProofworkError::Chain(format!(
                "Session {} failed verification",
                report.session_id
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::score::score_store;
    use super::verify::{verify_session, SignatureStatus};
    use super::*;
    use crate::chain::signing::Keystore;
    use crate::scoring::SpaceFramework;
    use crate::session::{EndRequest, SessionOptions, SessionState};
    use crate::storage::MilestoneInput;
    use crate::test_utils::{assert_proofwork_error_contains, temp_store as store, test_config};
    use std::sync::Arc;

    fn sealed_session(store: &Arc<SessionStore>, options: SessionOptions) -> String {
        let mut state = SessionState::new(Arc::clone(store), options, Some("zed".into()));
        state.start(None).unwrap();
        state.heartbeat().unwrap();
        let id = state.session_id().to_string();
        state
            .end(EndRequest {
                languages: vec!["rust".into()],
                files_touched_count: Some(3),
                milestones: vec![MilestoneInput {
                    title: "Ship it".into(),
                    category: "feature".into(),
                    complexity: "complex".into(),
                    private_title: None,
                }],
                ..Default::default()
            })
            .unwrap();
        id
    }

    #[test]
    fn test_score_store_counts_history() {
        let (store, _dir) = store();
        let options = SessionOptions {
            signing_key: None,
            milestone_tracking: true,
        };
        sealed_session(&store, options);

        let today = chrono::Utc::now().date_naive();
        let report = score_store(&store, &SpaceFramework, today).unwrap();
        assert_eq!(report.sessions, 1);
        assert_eq!(report.milestones, 1);
        assert_eq!(report.streak_days, 1);
        assert!(report.aps.score > 0);
        assert!((report.aps.components.output - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_score_store_empty() {
        let (store, _dir) = store();
        let report = score_store(&store, &SpaceFramework, chrono::Utc::now().date_naive()).unwrap();
        assert_eq!(report.aps.score, 0);
        assert_eq!(report.sessions, 0);
    }

    #[test]
    fn test_verify_signed_session() {
        let (store, _dir) = store();
        let keystore = Keystore::load_or_create(&store.keystore_path()).unwrap();
        let options = SessionOptions {
            signing_key: Some(keystore.signing_key().unwrap()),
            milestone_tracking: false,
        };
        let id = sealed_session(&store, options);

        let report = verify_session(&store, &id).unwrap();
        assert!(report.chain.is_valid());
        assert!(report.seal_consistent);
        assert_eq!(report.signature, SignatureStatus::Valid);
        assert!(report.indexed);
        assert!(report.is_ok());
        assert!(report.path.starts_with(store.sealed_dir()));
    }

    #[test]
    fn test_verify_unsigned_session_with_milestones() {
        let (store, _dir) = store();
        let options = SessionOptions {
            signing_key: None,
            milestone_tracking: true,
        };
        let id = sealed_session(&store, options);

        let report = verify_session(&store, &id).unwrap();
        assert_eq!(report.signature, SignatureStatus::Unsigned);
        assert!(report.seal_consistent);
        assert!(report.is_ok());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let (store, _dir) = store();
        let id = sealed_session(&store, SessionOptions::default());
        let path = store.sealed_dir().join(format!("{}.jsonl", id));
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replacen("\"heartbeat_number\":1", "\"heartbeat_number\":9", 1))
            .unwrap();

        let report = verify_session(&store, &id).unwrap();
        assert_eq!(report.chain.first_invalid_seq, Some(2));
        assert!(!report.is_ok());
    }

    #[test]
    fn test_verify_unsealed_active_chain() {
        let (store, _dir) = store();
        let mut state = SessionState::new(Arc::clone(&store), SessionOptions::default(), None);
        state.start(None).unwrap();
        let id = state.session_id().to_string();

        let report = verify_session(&store, &id).unwrap();
        assert_eq!(report.signature, SignatureStatus::NotSealed);
        assert!(!report.indexed);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_verify_rejects_unknown_and_unsafe_ids() {
        let (store, _dir) = store();
        let err = verify_session(&store, "missing").unwrap_err();
        assert_proofwork_error_contains(&err, "No chain found");
        let err = verify_session(&store, "../keystore").unwrap_err();
        assert_proofwork_error_contains(&err, "Invalid session id");
    }

    #[test]
    fn test_run_verify_fails_on_tampered_chain() {
        let (store, dir) = store();
        let id = sealed_session(&store, SessionOptions::default());
        let config = test_config(dir.path());
        assert!(verify::run_verify(config.clone(), id.clone()).is_ok());

        let path = store.sealed_dir().join(format!("{}.jsonl", id));
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replacen("\"client\":\"zed\"", "\"client\":\"vim\"", 1))
            .unwrap();
        let err = verify::run_verify(config, id).unwrap_err();
        assert_proofwork_error_contains(&err, "failed verification");
    }

    #[test]
    fn test_run_score_rejects_unknown_framework() {
        let (_store, dir) = store();
        let mut config = test_config(dir.path());
        assert!(score::run_score(config.clone(), true).is_ok());
        config.tracking.evaluation_framework = "dora".into();
        let err = score::run_score(config, false).unwrap_err();
        assert_proofwork_error_contains(&err, "Unknown evaluation framework");
    }
}
