//! Session lifecycle on top of the hash chain
//!
//! A [`SessionState`] belongs to one client connection. It moves through
//! [`SessionPhase::Idle`] → [`SessionPhase::Active`] → [`SessionPhase::Ended`]
//! and is replaced in place by a fresh context for the next session on the
//! same connection.
//!
//! Calling `start` while a session is active nests: the running session is
//! pushed onto a parent stack and resumed with
//! [`SessionState::restore_parent_state`] once the inner session has ended.

pub mod client;
pub mod recovery;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use metrics::increment_counter;
use tracing::{debug, info, warn};

use crate::chain::signing::sign_json;
use crate::chain::{
    AppendedRecord, HashChain, HeartbeatData, MilestoneData, Record, RecordPayload,
    SessionEndData, SessionSealData, SessionStartData,
};
use crate::error::{ProofworkError, Result};
use crate::storage::{
    Milestone, MilestoneInput, Seal, SealSummary, SessionEvaluation, SessionStore,
};

/// Task type recorded when a client does not name one.
pub const DEFAULT_TASK_TYPE: &str = "coding";

/// Per-daemon settings every session shares
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Key used to sign seals; `None` produces unsigned seals
    pub signing_key: Option<SigningKey>,
    /// Persist milestones supplied at `end`
    pub milestone_tracking: bool,
}

/// Arguments of an explicit `end`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndRequest {
    pub task_type: Option<String>,
    pub languages: Vec<String>,
    pub files_touched_count: Option<u32>,
    pub milestones: Vec<MilestoneInput>,
    pub evaluation: Option<SessionEvaluation>,
    pub model: Option<String>,
    pub project: Option<String>,
    pub title: Option<String>,
    pub private_title: Option<String>,
}

/// Why a session is being sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTrigger {
    /// The client called `end`
    Explicit,
    /// The connection sat idle past the timeout
    IdleTimeout,
    /// The connection was closed with unsealed data
    Cleanup,
    /// An orphaned chain from a previous daemon run
    Recovery,
}

impl SealTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::IdleTimeout => "idle_timeout",
            Self::Cleanup => "cleanup",
            Self::Recovery => "recovery",
        }
    }

    pub fn is_auto(&self) -> bool {
        !matches!(self, Self::Explicit)
    }
}

/// Lifecycle phase of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
    Ended,
}

/// Everything produced by sealing one session
#[derive(Debug, Clone, PartialEq)]
pub struct SealOutcome {
    pub seal: Seal,
    pub milestones: Vec<Milestone>,
    /// Whether the chain file made it into `sealed/`
    pub relocated: bool,
}

/// Point-in-time view of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub client: String,
    pub task_type: String,
    pub conversation_index: u32,
    pub heartbeat_count: u32,
    /// Number of saved parent sessions
    pub parent_depth: usize,
}

/// Snapshot-able part of a session; parents are stacked copies of this.
#[derive(Debug, Clone)]
struct SessionContext {
    session_id: String,
    client: String,
    task_type: String,
    conversation_id: String,
    conversation_index: u32,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    heartbeat_count: u32,
    chain: HashChain,
    sealed: bool,
}

impl SessionContext {
    fn has_unsealed_data(&self) -> bool {
        !self.sealed && self.chain.record_count() > 0
    }
}

/// Mutable per-connection session state
#[derive(Debug)]
pub struct SessionState {
    current: SessionContext,
    parents: Vec<SessionContext>,
    next_conversation_index: u32,
    transport_client: Option<String>,
    store: Arc<SessionStore>,
    options: SessionOptions,
}

impl SessionState {
    /// Create an idle session state for a new connection.
    ///
    /// `transport_client` is the client name the transport reported, if any.
    pub fn new(
        store: Arc<SessionStore>,
        options: SessionOptions,
        transport_client: Option<String>,
    ) -> Self {
        let conversation_id = uuid::Uuid::new_v4().to_string();
        let current = fresh_context(
            &store,
            client::resolve_client(transport_client.as_deref()),
            DEFAULT_TASK_TYPE.to_string(),
            conversation_id,
            0,
        );
        Self {
            current,
            parents: Vec::new(),
            next_conversation_index: 0,
            transport_client,
            store,
            options,
        }
    }

    /// Rebuild the state of a chain that was never sealed.
    ///
    /// The chain must begin with a `session_start` record.
    pub(crate) fn resume(
        store: Arc<SessionStore>,
        options: SessionOptions,
        chain: HashChain,
        records: &[Record],
    ) -> Result<Self> {
        let Some(RecordPayload::SessionStart(start)) = records.first().map(|r| &r.payload) else {
            return Err(ProofworkError::Chain(format!(
                "Chain {} does not begin with session_start",
                chain.path().display()
            ))
            .into());
        };

        let started_at = DateTime::parse_from_rfc3339(&start.started_at)
            .map_err(|e| ProofworkError::Chain(format!("Bad started_at: {}", e)))?
            .with_timezone(&Utc);

        let mut heartbeat_count = 0;
        let mut last_seconds = 0;
        let mut sealed = false;
        for record in records {
            match &record.payload {
                RecordPayload::Heartbeat(hb) => {
                    heartbeat_count = hb.heartbeat_number;
                    last_seconds = hb.cumulative_seconds;
                }
                RecordPayload::SessionSeal(_) => sealed = true,
                _ => {}
            }
        }

        let current = SessionContext {
            session_id: start.session_id.clone(),
            client: start.client.clone(),
            task_type: start.task_type.clone(),
            conversation_id: start.conversation_id.clone(),
            conversation_index: start.conversation_index,
            started_at,
            last_activity: started_at + chrono::Duration::seconds(last_seconds),
            heartbeat_count,
            chain,
            sealed,
        };
        Ok(Self {
            next_conversation_index: start.conversation_index + 1,
            transport_client: Some(start.client.clone()),
            current,
            parents: Vec::new(),
            store,
            options,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.current.session_id
    }

    pub fn client(&self) -> &str {
        &self.current.client
    }

    pub fn task_type(&self) -> &str {
        &self.current.task_type
    }

    pub fn conversation_id(&self) -> &str {
        &self.current.conversation_id
    }

    pub fn conversation_index(&self) -> u32 {
        self.current.conversation_index
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.current.started_at
    }

    pub fn heartbeat_count(&self) -> u32 {
        self.current.heartbeat_count
    }

    pub fn record_count(&self) -> u64 {
        self.current.chain.record_count()
    }

    /// Tip of the current chain, `GENESIS` before the first record.
    pub fn chain_tip_hash(&self) -> &str {
        self.current.chain.tip_hash()
    }

    pub fn chain_path(&self) -> &std::path::Path {
        self.current.chain.path()
    }

    /// Number of saved parent sessions.
    pub fn parent_depth(&self) -> usize {
        self.parents.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.current.session_id.clone(),
            client: self.current.client.clone(),
            task_type: self.current.task_type.clone(),
            conversation_index: self.current.conversation_index,
            heartbeat_count: self.current.heartbeat_count,
            parent_depth: self.parents.len(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.current.sealed {
            SessionPhase::Ended
        } else if self.current.chain.record_count() == 0 {
            SessionPhase::Idle
        } else {
            SessionPhase::Active
        }
    }

    /// True when the current session or any saved parent holds records
    /// that have not been sealed yet.
    pub fn has_unsealed_data(&self) -> bool {
        self.current.has_unsealed_data() || self.parents.iter().any(|p| p.has_unsealed_data())
    }

    /// Begin a new session and append `session_start`.
    ///
    /// An active session is saved as a parent first.
    pub fn start(&mut self, task_type: Option<String>) -> Result<AppendedRecord> {
        if self.phase() == SessionPhase::Active {
            self.save_parent_state();
        }

        let conversation_index = self.next_conversation_index;
        self.next_conversation_index += 1;
        self.current = fresh_context(
            &self.store,
            client::resolve_client(self.transport_client.as_deref()),
            task_type.unwrap_or_else(|| DEFAULT_TASK_TYPE.to_string()),
            self.current.conversation_id.clone(),
            conversation_index,
        );

        let ctx = &mut self.current;
        let appended = ctx.chain.append(RecordPayload::SessionStart(SessionStartData {
            session_id: ctx.session_id.clone(),
            client: ctx.client.clone(),
            task_type: ctx.task_type.clone(),
            conversation_id: ctx.conversation_id.clone(),
            conversation_index,
            started_at: ctx.started_at.to_rfc3339(),
        }))?;

        info!(
            session_id = %ctx.session_id,
            client = %ctx.client,
            task_type = %ctx.task_type,
            nested = self.parents.len(),
            "Session started"
        );
        Ok(appended)
    }

    /// Record a heartbeat, starting a session first when none is active.
    pub fn heartbeat(&mut self) -> Result<AppendedRecord> {
        if self.phase() != SessionPhase::Active {
            debug!("Heartbeat without an active session, starting one");
            self.start(None)?;
        }

        let now = Utc::now();
        let ctx = &mut self.current;
        ctx.heartbeat_count += 1;
        ctx.last_activity = now;
        ctx.chain.append(RecordPayload::Heartbeat(HeartbeatData {
            heartbeat_number: ctx.heartbeat_count,
            cumulative_seconds: (now - ctx.started_at).num_seconds().max(0),
        }))
    }

    /// End the active session: append `session_end` and `session_seal`,
    /// relocate the chain file and persist the seal and milestones.
    ///
    /// The session counts as sealed once `session_seal` is on disk. A later
    /// failure (such as a corrupt `sessions.json`) is returned, and
    /// [`SessionState::auto_seal`] will not seal the session again.
    ///
    /// # Errors
    ///
    /// `SessionNotActive` when no session is running, otherwise chain,
    /// signing or index errors.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use proofwork::session::{EndRequest, SessionOptions, SessionState};
    /// use proofwork::storage::SessionStore;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let store = Arc::new(SessionStore::open("/tmp/proofwork")?);
    /// let mut session = SessionState::new(store, SessionOptions::default(), None);
    /// session.start(None)?;
    /// let outcome = session.end(EndRequest {
    ///     languages: vec!["rust".to_string()],
    ///     files_touched_count: Some(3),
    ///     ..Default::default()
    /// })?;
    /// assert_eq!(outcome.seal.summary.files_touched, 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn end(&mut self, request: EndRequest) -> Result<SealOutcome> {
        if self.phase() != SessionPhase::Active {
            return Err(ProofworkError::SessionNotActive.into());
        }
        self.seal_current(request, SealTrigger::Explicit)
    }

    /// Seal every session holding unsealed data, the current one first and
    /// then each saved parent, and leave a fresh idle context behind.
    pub fn auto_seal(&mut self, trigger: SealTrigger) -> Result<Vec<SealOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            if self.current.has_unsealed_data() {
                outcomes.push(self.seal_current(EndRequest::default(), trigger)?);
            }
            if !self.restore_parent_state() {
                break;
            }
        }
        self.reset();
        Ok(outcomes)
    }

    /// Replace the current context with a fresh idle one.
    pub fn reset(&mut self) {
        self.current = fresh_context(
            &self.store,
            client::resolve_client(self.transport_client.as_deref()),
            DEFAULT_TASK_TYPE.to_string(),
            self.current.conversation_id.clone(),
            self.next_conversation_index,
        );
        self.parents.clear();
    }

    /// Push a snapshot of the current session onto the parent stack.
    pub fn save_parent_state(&mut self) {
        debug!(session_id = %self.current.session_id, "Saving parent session");
        self.parents.push(self.current.clone());
    }

    /// Pop the most recent parent back into place. False when the stack is
    /// empty.
    pub fn restore_parent_state(&mut self) -> bool {
        match self.parents.pop() {
            Some(parent) => {
                debug!(session_id = %parent.session_id, "Restoring parent session");
                self.current = parent;
                true
            }
            None => false,
        }
    }

    fn seal_current(&mut self, request: EndRequest, trigger: SealTrigger) -> Result<SealOutcome> {
        let ctx = &mut self.current;
        let ended_at = match trigger {
            SealTrigger::Recovery => ctx.last_activity,
            _ => Utc::now(),
        };
        let duration_seconds = (ended_at - ctx.started_at).num_seconds().max(0);
        let chain_start_hash = ctx.chain.tip_hash().to_string();
        let task_type = request.task_type.unwrap_or_else(|| ctx.task_type.clone());
        let languages = normalize_languages(&request.languages);
        let files_touched = request.files_touched_count.unwrap_or(0);
        let auto_sealed = trigger.is_auto();

        ctx.chain.append(RecordPayload::SessionEnd(SessionEndData {
            duration_seconds,
            task_type: task_type.clone(),
            languages: languages.clone(),
            files_touched,
            heartbeat_count: ctx.heartbeat_count,
            auto_sealed,
        }))?;

        let summary = SealSummary {
            session_id: ctx.session_id.clone(),
            client: ctx.client.clone(),
            task_type,
            languages: languages.clone(),
            files_touched,
            started_at: ctx.started_at.to_rfc3339(),
            ended_at: ended_at.to_rfc3339(),
            duration_seconds,
            heartbeat_count: ctx.heartbeat_count,
            record_count: ctx.chain.record_count(),
            chain_start_hash,
            chain_end_hash: ctx.chain.tip_hash().to_string(),
            evaluation: request.evaluation,
            model: request.model,
            project: request.project,
            title: request.title,
            private_title: request.private_title,
            conversation_id: Some(ctx.conversation_id.clone()),
            conversation_index: Some(ctx.conversation_index),
            auto_sealed,
        };
        let seal_json = serde_json::to_string(&summary)?;
        let seal_signature = sign_json(&seal_json, self.options.signing_key.as_ref());
        ctx.chain.append(RecordPayload::SessionSeal(SessionSealData {
            seal: seal_json,
            seal_signature: seal_signature.clone(),
        }))?;
        // Closed from here on, even if persisting below fails.
        ctx.sealed = true;

        let relocated = match ctx.chain.relocate(self.store.sealed_dir()) {
            Ok(path) => {
                debug!(path = %path.display(), "Chain file moved to sealed");
                true
            }
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "Could not relocate chain file, keeping it in place");
                increment_counter!("proofwork_relocation_failures_total");
                false
            }
        };

        let seal = Seal {
            summary,
            seal_signature,
        };
        self.store.append_session(&seal)?;

        let mut milestones = Vec::new();
        if self.options.milestone_tracking && !request.milestones.is_empty() {
            let created_at = Utc::now().to_rfc3339();
            for input in request.milestones {
                let milestone = Milestone {
                    id: format!("m_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
                    session_id: ctx.session_id.clone(),
                    title: input.title,
                    category: input.category,
                    complexity: input.complexity,
                    duration_minutes: (duration_seconds + 30) / 60,
                    languages: languages.clone(),
                    client: ctx.client.clone(),
                    created_at: created_at.clone(),
                    published: false,
                    private_title: input.private_title,
                };
                ctx.chain.append(RecordPayload::Milestone(MilestoneData {
                    milestone_id: milestone.id.clone(),
                    title: milestone.title.clone(),
                    category: milestone.category.clone(),
                    complexity: milestone.complexity.clone(),
                }))?;
                milestones.push(milestone);
            }
            self.store.append_milestones(&milestones)?;
        }

        increment_counter!("proofwork_seals_total", "trigger" => trigger.as_str());
        info!(
            session_id = %ctx.session_id,
            trigger = trigger.as_str(),
            signed = seal.is_signed(),
            records = ctx.chain.record_count(),
            milestones = milestones.len(),
            "Session sealed"
        );

        Ok(SealOutcome {
            seal,
            milestones,
            relocated,
        })
    }
}

fn fresh_context(
    store: &SessionStore,
    client: String,
    task_type: String,
    conversation_id: String,
    conversation_index: u32,
) -> SessionContext {
    let session_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    SessionContext {
        chain: HashChain::new(session_id.clone(), store.active_dir()),
        session_id,
        client,
        task_type,
        conversation_id,
        conversation_index,
        started_at: now,
        last_activity: now,
        heartbeat_count: 0,
        sealed: false,
    }
}

/// Lowercase, trim and de-duplicate language names, keeping first-seen order.
fn normalize_languages(languages: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for language in languages {
        let language = language.trim().to_lowercase();
        if !language.is_empty() && !out.contains(&language) {
            out.push(language);
        }
    }
    out
}
