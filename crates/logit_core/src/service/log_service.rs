//! Run log use-case service.
//!
//! # Responsibility
//! - Normalize and validate log entries before they reach storage.
//! - Derive a content hash when the caller does not supply one.
//!
//! # Invariants
//! - Entries are validated after normalization; repositories only see valid
//!   entries.
//! - Service layer remains storage-agnostic.

use crate::db::DbError;
use crate::model::entry::{LogEntry, LogEntryError};
use crate::model::run::{run_hash_for, Run, RunId};
use crate::repo::log_repo::{RunDeletion, RunLogRepository};
use crate::repo::new_status::NewStatusSummary;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum LogServiceError {
    Validation(LogEntryError),
    RunNotFound(RunId),
    Db(DbError),
}

impl Display for LogServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::RunNotFound(id) => write!(f, "run not found: {id}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LogServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::RunNotFound(_) => None,
        }
    }
}

impl From<LogEntryError> for LogServiceError {
    fn from(value: LogEntryError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for LogServiceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Rows removed by `LogService::sweep_orphans`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanSweep {
    pub sub_files: usize,
    pub ieds: usize,
}

/// Use-case service wrapper for the run log.
pub struct LogService<R: RunLogRepository> {
    repo: R,
}

impl<R: RunLogRepository> LogService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Logs one run and returns the stored record.
    ///
    /// # Contract
    /// - Names are trimmed; repeated sub-files/ieds within the entry collapse.
    /// - A blank `run_hash` is replaced by `run_hash_for(timestamp, run)`;
    ///   without a timestamp the hash covers the run fields only.
    pub fn log_run(&self, entry: LogEntry) -> Result<Run, LogServiceError> {
        let entry = normalize_entry(entry);
        entry.validate()?;

        let run_id = self.repo.log_entry(&entry)?;
        self.repo
            .get_run(run_id)?
            .ok_or(LogServiceError::RunNotFound(run_id))
    }

    pub fn get_run(&self, id: RunId) -> Result<Run, LogServiceError> {
        self.repo
            .get_run(id)?
            .ok_or(LogServiceError::RunNotFound(id))
    }

    pub fn delete_run(&self, id: RunId, cascade: bool) -> Result<RunDeletion, LogServiceError> {
        self.repo.delete_run(id, cascade).map_err(|err| match err {
            DbError::RowNotFound { .. } => LogServiceError::RunNotFound(id),
            other => LogServiceError::Db(other),
        })
    }

    /// Removes sub-files and ieds that no association row references.
    pub fn sweep_orphans(&self) -> Result<OrphanSweep, LogServiceError> {
        Ok(OrphanSweep {
            sub_files: self.repo.delete_orphan_sub_files()?,
            ieds: self.repo.delete_orphan_ieds()?,
        })
    }

    pub fn update_new_status(&self) -> Result<NewStatusSummary, LogServiceError> {
        Ok(self.repo.update_new_status()?)
    }
}

fn normalize_entry(mut entry: LogEntry) -> LogEntry {
    entry.dat = entry
        .dat
        .map(|dat| dat.trim().to_string())
        .filter(|dat| !dat.is_empty());
    for model_file in &mut entry.model_files {
        model_file.name = model_file.name.trim().to_string();
        model_file.sub_files = dedup_trimmed(&model_file.sub_files);
    }
    entry.ieds = dedup_trimmed(&entry.ieds);

    entry.run.run_hash = entry.run.run_hash.trim().to_string();
    if entry.run.run_hash.is_empty() {
        let timestamp = entry.timestamp.as_deref().unwrap_or_default();
        entry.run.run_hash = run_hash_for(timestamp, &entry.run);
    }
    entry
}

fn dedup_trimmed(names: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if !unique.iter().any(|existing| existing == name) {
            unique.push(name.to_string());
        }
    }
    unique
}
