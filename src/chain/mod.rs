//! Append-only hash chain for session activity
//!
//! Every session owns one chain. Each record links to its predecessor through
//! `prev_hash`, and its own `hash` is
//! `sha256(prev_hash || canonical_json({type, data, seq}))`. The first record
//! links to the [`GENESIS`] sentinel.
//!
//! Records are written to `<dir>/<session_id>.jsonl`, one JSON object per
//! line, and flushed to disk before [`HashChain::append`] returns.
//!
//! # Example
//!
//! ```no_run
//! use proofwork::chain::{HashChain, RecordPayload, HeartbeatData};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut chain = HashChain::new("s-1", "/tmp/active");
//! let appended = chain.append(RecordPayload::Heartbeat(HeartbeatData {
//!     heartbeat_number: 1,
//!     cumulative_seconds: 60,
//! }))?;
//! assert_eq!(appended.seq, 1);
//! # Ok(())
//! # }
//! ```

pub mod signing;

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProofworkError, Result};

/// Sentinel tip hash meaning "no prior chain record exists".
pub const GENESIS: &str = "GENESIS";

/// Discriminant of a chain record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    SessionStart,
    Heartbeat,
    SessionEnd,
    SessionSeal,
    Milestone,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::Heartbeat => "heartbeat",
            Self::SessionEnd => "session_end",
            Self::SessionSeal => "session_seal",
            Self::Milestone => "milestone",
        }
    }
}

/// Payload of a `session_start` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartData {
    pub session_id: String,
    pub client: String,
    pub task_type: String,
    pub conversation_id: String,
    pub conversation_index: u32,
    /// RFC-3339 start timestamp
    pub started_at: String,
}

/// Payload of a `heartbeat` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub heartbeat_number: u32,
    /// Seconds elapsed since `session_start`
    pub cumulative_seconds: i64,
}

/// Payload of a `session_end` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndData {
    pub duration_seconds: i64,
    pub task_type: String,
    pub languages: Vec<String>,
    pub files_touched: u32,
    pub heartbeat_count: u32,
    #[serde(default)]
    pub auto_sealed: bool,
}

/// Payload of a `session_seal` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSealData {
    /// The exact JSON text that was digested and signed
    pub seal: String,
    pub seal_signature: String,
}

/// Payload of a `milestone` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneData {
    pub milestone_id: String,
    pub title: String,
    pub category: String,
    pub complexity: String,
}

/// Tagged record payload, one case per record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecordPayload {
    SessionStart(SessionStartData),
    Heartbeat(HeartbeatData),
    SessionEnd(SessionEndData),
    SessionSeal(SessionSealData),
    Milestone(MilestoneData),
}

impl RecordPayload {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::SessionStart(_) => RecordType::SessionStart,
            Self::Heartbeat(_) => RecordType::Heartbeat,
            Self::SessionEnd(_) => RecordType::SessionEnd,
            Self::SessionSeal(_) => RecordType::SessionSeal,
            Self::Milestone(_) => RecordType::Milestone,
        }
    }

    /// The `data` half of the payload as a JSON value.
    fn data_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::SessionStart(d) => serde_json::to_value(d)?,
            Self::Heartbeat(d) => serde_json::to_value(d)?,
            Self::SessionEnd(d) => serde_json::to_value(d)?,
            Self::SessionSeal(d) => serde_json::to_value(d)?,
            Self::Milestone(d) => serde_json::to_value(d)?,
        };
        Ok(value)
    }
}

/// A single linked chain record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub seq: u64,
    pub payload: RecordPayload,
    pub hash: String,
    pub prev_hash: String,
}

/// On-disk line shape: `{"seq", "type", "data", "hash", "prev_hash"}`.
#[derive(Debug, Serialize, Deserialize)]
struct RecordLine {
    seq: u64,
    #[serde(rename = "type")]
    record_type: RecordType,
    data: serde_json::Value,
    hash: String,
    prev_hash: String,
}

impl Record {
    fn to_line(&self) -> Result<RecordLine> {
        Ok(RecordLine {
            seq: self.seq,
            record_type: self.payload.record_type(),
            data: self.payload.data_value()?,
            hash: self.hash.clone(),
            prev_hash: self.prev_hash.clone(),
        })
    }

    fn from_line(line: RecordLine) -> Result<Self> {
        let payload: RecordPayload = serde_json::from_value(serde_json::json!({
            "type": line.record_type,
            "data": line.data,
        }))?;
        Ok(Self {
            seq: line.seq,
            payload,
            hash: line.hash,
            prev_hash: line.prev_hash,
        })
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedRecord {
    pub hash: String,
    pub seq: u64,
}

/// Compute the chained hash of a record.
///
/// The hashed body is the canonical (sorted-key) JSON of
/// `{"data", "seq", "type"}`, prefixed with the previous hash.
pub fn compute_record_hash(prev_hash: &str, payload: &RecordPayload, seq: u64) -> Result<String> {
    let body = serde_json::json!({
        "type": payload.record_type().as_str(),
        "data": payload.data_value()?,
        "seq": seq,
    });
    let canonical = serde_json::to_string(&body)?;

    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Per-session append-only chain backed by a JSONL file.
#[derive(Debug, Clone)]
pub struct HashChain {
    session_id: String,
    path: PathBuf,
    tip_hash: String,
    record_count: u64,
}

impl HashChain {
    /// Create an empty chain whose log will live in `dir`.
    ///
    /// No file is created until the first append.
    pub fn new(session_id: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        let session_id = session_id.into();
        let path = dir.as_ref().join(format!("{}.jsonl", session_id));
        Self {
            session_id,
            path,
            tip_hash: GENESIS.to_string(),
            record_count: 0,
        }
    }

    /// Reopen an existing chain file, verifying every link.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<(Self, Vec<Record>)> {
        let path = path.into();
        let session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ProofworkError::Chain(format!("Bad chain path: {}", path.display())))?
            .to_string();

        let records = read_records(&path)?;
        let verification = verify_records(&records)?;
        if let Some(seq) = verification.first_invalid_seq {
            return Err(ProofworkError::Chain(format!(
                "Chain {} is broken at seq {}",
                path.display(),
                seq
            ))
            .into());
        }

        let chain = Self {
            session_id,
            path,
            tip_hash: verification.tip_hash,
            record_count: records.len() as u64,
        };
        Ok((chain, records))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash of the most recent record, or [`GENESIS`].
    pub fn tip_hash(&self) -> &str {
        &self.tip_hash
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Append a record and flush it to disk before acknowledging.
    ///
    /// # Arguments
    ///
    /// * `payload` - Typed record data; its tag becomes the record `type`
    ///
    /// # Returns
    ///
    /// The new record's hash and sequence number. The first record gets
    /// `seq` 1 and links to [`GENESIS`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use proofwork::chain::{HashChain, HeartbeatData, RecordPayload};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let mut chain = HashChain::new("s1", "/tmp/proofwork/active");
    /// let first = chain.append(RecordPayload::Heartbeat(HeartbeatData {
    ///     heartbeat_number: 1,
    ///     cumulative_seconds: 30,
    /// }))?;
    /// assert_eq!(first.seq, 1);
    /// assert_eq!(chain.tip_hash(), first.hash);
    /// # Ok(())
    /// # }
    /// ```
    pub fn append(&mut self, payload: RecordPayload) -> Result<AppendedRecord> {
        let seq = self.record_count + 1;
        let hash = compute_record_hash(&self.tip_hash, &payload, seq)?;
        let record = Record {
            seq,
            payload,
            hash: hash.clone(),
            prev_hash: self.tip_hash.clone(),
        };

        let line = serde_json::to_string(&record.to_line()?)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open chain file {}", self.path.display()))?;
        writeln!(file, "{}", line)?;
        file.sync_data()?;

        self.record_count = seq;
        self.tip_hash = hash.clone();
        increment_counter!("proofwork_records_appended_total", "type" => record.payload.record_type().as_str());

        tracing::trace!(session_id = %self.session_id, seq, "Appended chain record");
        Ok(AppendedRecord { hash, seq })
    }

    /// Move the log file into `dir`.
    ///
    /// On success subsequent appends go to the new location. On failure the
    /// chain keeps its current path and the error is returned for the caller
    /// to log.
    pub fn relocate(&mut self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let target = dir.as_ref().join(format!("{}.jsonl", self.session_id));
        std::fs::rename(&self.path, &target).with_context(|| {
            format!(
                "Failed to move {} to {}",
                self.path.display(),
                target.display()
            )
        })?;
        self.path = target.clone();
        Ok(target)
    }
}

/// Read every record from a chain file.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open chain file {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: RecordLine = serde_json::from_str(&line).map_err(|e| {
            ProofworkError::Chain(format!(
                "{} line {}: {}",
                path.display(),
                index + 1,
                e
            ))
        })?;
        records.push(Record::from_line(parsed)?);
    }
    Ok(records)
}

/// Outcome of re-walking a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub record_count: usize,
    /// Recomputed tip hash over the valid prefix
    pub tip_hash: String,
    /// Sequence number of the first record that fails verification
    pub first_invalid_seq: Option<u64>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.first_invalid_seq.is_none()
    }
}

/// Recompute every hash and check `seq` and `prev_hash` linkage.
pub fn verify_records(records: &[Record]) -> Result<ChainVerification> {
    let mut tip = GENESIS.to_string();
    for (index, record) in records.iter().enumerate() {
        let expected_seq = index as u64 + 1;
        let recomputed = compute_record_hash(&tip, &record.payload, record.seq)?;
        if record.seq != expected_seq || record.prev_hash != tip || record.hash != recomputed {
            return Ok(ChainVerification {
                record_count: records.len(),
                tip_hash: tip,
                first_invalid_seq: Some(expected_seq),
            });
        }
        tip = recomputed;
    }
    Ok(ChainVerification {
        record_count: records.len(),
        tip_hash: tip,
        first_invalid_seq: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn heartbeat(n: u32) -> RecordPayload {
        RecordPayload::Heartbeat(HeartbeatData {
            heartbeat_number: n,
            cumulative_seconds: i64::from(n) * 60,
        })
    }

    #[test]
    fn test_new_chain_starts_at_genesis() {
        let chain = HashChain::new("abc", "/tmp");
        assert_eq!(chain.tip_hash(), GENESIS);
        assert_eq!(chain.record_count(), 0);
        assert!(chain.path().ends_with("abc.jsonl"));
    }

    #[test]
    fn test_append_increments_seq_from_one() {
        let dir = TempDir::new().unwrap();
        let mut chain = HashChain::new("s", dir.path());
        for expected in 1..=5u64 {
            let appended = chain.append(heartbeat(expected as u32)).unwrap();
            assert_eq!(appended.seq, expected);
            assert_eq!(chain.tip_hash(), appended.hash);
        }
        assert_eq!(chain.record_count(), 5);
    }

    #[test]
    fn test_first_record_links_to_genesis() {
        let dir = TempDir::new().unwrap();
        let mut chain = HashChain::new("s", dir.path());
        chain.append(heartbeat(1)).unwrap();
        let records = read_records(chain.path()).unwrap();
        assert_eq!(records[0].prev_hash, GENESIS);
    }

    #[test]
    fn test_tip_is_deterministic_for_same_sequence() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let mut first = HashChain::new("x", a.path());
        let mut second = HashChain::new("y", b.path());
        for n in 1..=3 {
            first.append(heartbeat(n)).unwrap();
            second.append(heartbeat(n)).unwrap();
        }
        assert_eq!(first.tip_hash(), second.tip_hash());
    }

    #[test]
    fn test_tip_depends_on_order() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let mut first = HashChain::new("x", a.path());
        let mut second = HashChain::new("y", b.path());
        first.append(heartbeat(1)).unwrap();
        first.append(heartbeat(2)).unwrap();
        second.append(heartbeat(2)).unwrap();
        second.append(heartbeat(1)).unwrap();
        assert_ne!(first.tip_hash(), second.tip_hash());
    }

    #[test]
    fn test_written_lines_use_type_and_data_keys() {
        let dir = TempDir::new().unwrap();
        let mut chain = HashChain::new("s", dir.path());
        chain.append(heartbeat(1)).unwrap();
        let raw = std::fs::read_to_string(chain.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["data"]["heartbeat_number"], 1);
        assert_eq!(value["seq"], 1);
        assert_eq!(value["prev_hash"], GENESIS);
    }

    #[test]
    fn test_verify_detects_tampered_record() {
        let dir = TempDir::new().unwrap();
        let mut chain = HashChain::new("s", dir.path());
        for n in 1..=3 {
            chain.append(heartbeat(n)).unwrap();
        }
        let mut records = read_records(chain.path()).unwrap();
        assert!(verify_records(&records).unwrap().is_valid());

        records[1].payload = heartbeat(99);
        let verification = verify_records(&records).unwrap();
        assert_eq!(verification.first_invalid_seq, Some(2));
    }

    #[test]
    fn test_open_existing_restores_tip_and_count() {
        let dir = TempDir::new().unwrap();
        let mut chain = HashChain::new("resume", dir.path());
        chain.append(heartbeat(1)).unwrap();
        chain.append(heartbeat(2)).unwrap();

        let (reopened, records) = HashChain::open_existing(chain.path()).unwrap();
        assert_eq!(reopened.session_id(), "resume");
        assert_eq!(reopened.tip_hash(), chain.tip_hash());
        assert_eq!(reopened.record_count(), 2);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_relocate_moves_file_and_updates_path() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("active");
        let sealed = dir.path().join("sealed");
        std::fs::create_dir_all(&sealed).unwrap();

        let mut chain = HashChain::new("s", &active);
        chain.append(heartbeat(1)).unwrap();
        let target = chain.relocate(&sealed).unwrap();

        assert!(target.exists());
        assert!(!active.join("s.jsonl").exists());
        chain.append(heartbeat(2)).unwrap();
        assert_eq!(read_records(&target).unwrap().len(), 2);
    }

    #[test]
    fn test_relocate_failure_keeps_original_path() {
        let dir = TempDir::new().unwrap();
        let mut chain = HashChain::new("s", dir.path());
        chain.append(heartbeat(1)).unwrap();
        let original = chain.path().to_path_buf();

        assert!(chain.relocate(dir.path().join("missing-dir")).is_err());
        assert_eq!(chain.path(), original.as_path());
        assert!(original.exists());
    }
}
