//! Log entry: everything recorded for one run in a single write.
//!
//! # Invariants
//! - File names are non-blank after trimming.
//! - A model file appears at most once per entry.

use crate::model::files::ModelFileKind;
use crate::model::run::RunDetails;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// A model file referenced by a run, with the sub-files it loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFileEntry {
    pub name: String,
    pub kind: ModelFileKind,
    #[serde(default)]
    pub sub_files: Vec<String>,
}

impl ModelFileEntry {
    pub fn new(name: impl Into<String>, kind: ModelFileKind) -> Self {
        Self {
            name: name.into(),
            kind,
            sub_files: Vec::new(),
        }
    }

    pub fn with_sub_files<I, S>(mut self, sub_files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_files = sub_files.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// SQLite text timestamp; `None` uses the database's `CURRENT_TIMESTAMP`.
    #[serde(default)]
    pub timestamp: Option<String>,
    pub run: RunDetails,
    #[serde(default)]
    pub dat: Option<String>,
    #[serde(default)]
    pub model_files: Vec<ModelFileEntry>,
    #[serde(default)]
    pub ieds: Vec<String>,
}

/// Validation errors for log entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntryError {
    MissingRunHash,
    BlankName { field: &'static str },
    DuplicateModelFile(String),
}

impl Display for LogEntryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRunHash => write!(f, "run hash must not be empty"),
            Self::BlankName { field } => write!(f, "{field} name must not be blank"),
            Self::DuplicateModelFile(name) => {
                write!(f, "model file `{name}` listed more than once")
            }
        }
    }
}

impl Error for LogEntryError {}

impl LogEntry {
    /// Checks names and the run hash.
    pub fn validate(&self) -> Result<(), LogEntryError> {
        if self.run.run_hash.trim().is_empty() {
            return Err(LogEntryError::MissingRunHash);
        }
        if self.dat.as_deref().is_some_and(is_blank) {
            return Err(LogEntryError::BlankName { field: "dat" });
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.model_files.len());
        for model_file in &self.model_files {
            if is_blank(&model_file.name) {
                return Err(LogEntryError::BlankName {
                    field: "model file",
                });
            }
            if model_file.sub_files.iter().any(|name| is_blank(name)) {
                return Err(LogEntryError::BlankName { field: "sub-file" });
            }
            if seen.contains(&model_file.name.as_str()) {
                return Err(LogEntryError::DuplicateModelFile(model_file.name.clone()));
            }
            seen.push(&model_file.name);
        }

        if self.ieds.iter().any(|name| is_blank(name)) {
            return Err(LogEntryError::BlankName { field: "ied" });
        }
        Ok(())
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
