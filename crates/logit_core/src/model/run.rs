//! Run record and run-hash derivation.
//!
//! # Invariants
//! - `run_hash` is unique across the database.
//! - Hashes are lowercase hex SHA-256 digests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Integer primary key of `Run`.
pub type RunId = i64;

/// Descriptive fields of a run, as captured from the model's log files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDetails {
    /// Blank means "derive from content" when logged through `LogService`.
    pub run_hash: String,
    pub setup: String,
    pub comments: String,
    pub ief: String,
    pub tcf: String,
    pub initial_conditions: String,
    pub isis_results: String,
    pub tuflow_results: String,
    pub estry_results: String,
    pub event_duration: f64,
    pub run_status: String,
    pub mb: f64,
    pub modeller: String,
    pub isis_version: String,
    pub tuflow_version: String,
    pub event_name: String,
    pub ief_dir: String,
    pub tcf_dir: String,
    pub log_dir: String,
    pub run_options: String,
}

/// Persisted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// SQLite text timestamp (`YYYY-MM-DD HH:MM:SS`).
    pub timestamp: String,
    pub dat: Option<String>,
    #[serde(flatten)]
    pub details: RunDetails,
}

/// Content hash for a newly logged run.
///
/// Covers the timestamp and the fields that distinguish one simulation from
/// another; comments and other user-editable text are excluded.
pub fn run_hash_for(timestamp: &str, details: &RunDetails) -> String {
    let mut hasher = Sha256::new();
    for part in [
        timestamp,
        details.ief.as_str(),
        details.tcf.as_str(),
        details.ief_dir.as_str(),
        details.tcf_dir.as_str(),
        details.event_name.as_str(),
        details.run_options.as_str(),
        details.initial_conditions.as_str(),
        details.modeller.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

/// Hash assigned to a run carried over from the legacy `RUN` table.
///
/// Includes the legacy id, so two legacy rows never collide.
pub fn legacy_run_hash(id: RunId, date: &str, ief: &str, tcf: &str) -> String {
    let digest = Sha256::digest(format!("legacy:{id}:{date}:{ief}:{tcf}").as_bytes());
    format!("{digest:x}")
}
