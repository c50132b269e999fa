//! On-disk layout and the shared session/milestone indexes
//!
//! ```text
//! <data_dir>/
//!   active/<session_id>.jsonl   live chain logs
//!   sealed/<session_id>.jsonl   chain logs of sealed sessions
//!   sessions.json               JSON array of seals
//!   milestones.json             JSON array of milestones
//!   keystore.json               signing key material
//! ```
//!
//! The two index files are the only state shared between sessions. Every
//! mutation is a read-append-write performed under one in-process mutex, and
//! the write goes through a temp file plus rename so readers never see a
//! partially written array.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProofworkError, Result};

pub mod types;
pub use types::{
    Milestone, MilestoneInput, Seal, SealSummary, SessionEvaluation, TaskOutcome,
};

const ACTIVE_DIR: &str = "active";
const SEALED_DIR: &str = "sealed";
const SESSIONS_FILE: &str = "sessions.json";
const MILESTONES_FILE: &str = "milestones.json";
const KEYSTORE_FILE: &str = "keystore.json";

/// Default data directory for this platform.
pub fn default_data_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("dev", "proofwork", "proofwork")
        .ok_or_else(|| ProofworkError::Storage("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

/// Owner of the data directory and the index write lock
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl SessionStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        for dir in [root.join(ACTIVE_DIR), root.join(SEALED_DIR)] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tracing::debug!(root = %root.display(), "Opened session store");
        Ok(Self {
            root,
            index_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_dir(&self) -> PathBuf {
        self.root.join(ACTIVE_DIR)
    }

    pub fn sealed_dir(&self) -> PathBuf {
        self.root.join(SEALED_DIR)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.root.join(SESSIONS_FILE)
    }

    pub fn milestones_path(&self) -> PathBuf {
        self.root.join(MILESTONES_FILE)
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.root.join(KEYSTORE_FILE)
    }

    /// All seals in the session index. A missing file is an empty index.
    pub fn load_sessions(&self) -> Result<Vec<Seal>> {
        read_index(&self.sessions_path())
    }

    /// All milestones in the milestone index.
    pub fn load_milestones(&self) -> Result<Vec<Milestone>> {
        read_index(&self.milestones_path())
    }

    /// Append one seal to `sessions.json`.
    pub fn append_session(&self, seal: &Seal) -> Result<()> {
        self.append_to_index(&self.sessions_path(), std::slice::from_ref(seal))
    }

    /// Append milestones to `milestones.json`.
    pub fn append_milestones(&self, milestones: &[Milestone]) -> Result<()> {
        if milestones.is_empty() {
            return Ok(());
        }
        self.append_to_index(&self.milestones_path(), milestones)
    }

    fn append_to_index<T>(&self, path: &Path, items: &[T]) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        // A poisoned guard protects no data of its own, so keep going.
        let _guard = self
            .index_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut entries: Vec<T> = read_index(path)?;
        entries.extend_from_slice(items);

        let json = serde_json::to_string_pretty(&entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        tracing::debug!(index = %path.display(), total = entries.len(), "Index updated");
        Ok(())
    }

    /// Chain logs still in `active/`.
    pub fn active_chain_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.active_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn count_active_chains(&self) -> Result<usize> {
        Ok(self.active_chain_files()?.len())
    }
}

fn read_index<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).map_err(|source| {
        ProofworkError::CorruptIndex {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}
