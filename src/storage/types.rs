use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Outcome a client reports for the task a session worked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Partial,
    Abandoned,
    Blocked,
}

/// Self-evaluation attached to a sealed session
///
/// The four ratings are on a 1-5 scale and feed the rubric dimensions of an
/// [`crate::scoring::EvaluationFramework`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvaluation {
    pub prompt_quality: u8,
    pub context_provided: u8,
    pub independence_level: u8,
    pub scope_quality: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_outcome: Option<TaskOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_leveraged: Option<u32>,
}

/// Everything a seal covers, i.e. the signed portion of a [`Seal`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealSummary {
    pub session_id: String,
    pub client: String,
    pub task_type: String,
    pub languages: Vec<String>,
    pub files_touched: u32,
    /// RFC-3339 start timestamp
    pub started_at: String,
    /// RFC-3339 end timestamp
    pub ended_at: String,
    pub duration_seconds: i64,
    pub heartbeat_count: u32,
    pub record_count: u64,
    pub chain_start_hash: String,
    pub chain_end_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<SessionEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_index: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_sealed: bool,
}

/// Immutable closing summary of a session, as stored in `sessions.json`
///
/// Serializes flat: the summary fields followed by `seal_signature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seal {
    #[serde(flatten)]
    pub summary: SealSummary,
    /// Hex Ed25519 signature over the summary JSON, or `"unsigned"`
    pub seal_signature: String,
}

impl Seal {
    pub fn session_id(&self) -> &str {
        &self.summary.session_id
    }

    pub fn is_signed(&self) -> bool {
        self.seal_signature != crate::chain::signing::UNSIGNED
    }
}

/// Milestone as supplied by a client when ending a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneInput {
    pub title: String,
    pub category: String,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
}

fn default_complexity() -> String {
    "medium".to_string()
}

/// Persisted milestone, as stored in `milestones.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub category: String,
    pub complexity: String,
    pub duration_minutes: i64,
    pub languages: Vec<String>,
    pub client: String,
    /// RFC-3339 creation timestamp
    pub created_at: String,
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
}
