//! SQLite storage bootstrap, schema catalog and version migration.
//!
//! # Responsibility
//! - Open and configure SQLite connections for `.logdb` files.
//! - Describe both schema generations and detect which one a file uses.
//! - Upgrade older databases through ordered, idempotent migration steps.
//!
//! # Invariants
//! - The schema version marker is `PRAGMA user_version`.
//! - Application data is only read/written once the marker equals
//!   `CURRENT_SCHEMA_VERSION`.
//! - Errors are returned to the caller; nothing here logs and continues.

use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod catalog;
pub mod migrations;
mod open;
pub mod probe;

pub use open::{create_db, open_db, open_db_in_memory};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 21;
/// Oldest version the migration registry can upgrade from.
pub const OLDEST_MIGRATABLE_VERSION: u32 = 17;
/// First version using the normalized table layout.
pub const FIRST_CURRENT_GENERATION_VERSION: u32 = 20;
/// File extension required for LogIT databases (without the dot).
pub const DATABASE_FILE_EXTENSION: &str = "logdb";

pub type DbResult<T> = Result<T, DbError>;

/// Relational layout family used by a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaGeneration {
    /// Denormalized raw-SQL tables (`RUN`, `TGC`, `DAT`, ...).
    Legacy,
    /// Normalized tables with association rows (`Run`, `ModelFile`, ...).
    Current,
}

impl SchemaGeneration {
    pub fn for_version(version: u32) -> Self {
        if version >= FIRST_CURRENT_GENERATION_VERSION {
            Self::Current
        } else {
            Self::Legacy
        }
    }
}

impl Display for SchemaGeneration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Current => f.write_str("current"),
        }
    }
}

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Database file does not exist.
    NotFound(PathBuf),
    /// File exists but is not a LogIT database.
    Format { path: PathBuf, reason: String },
    /// Version is outside the range this build can open or migrate.
    VersionUnsupported {
        db_version: u32,
        oldest_supported: u32,
        latest_supported: u32,
    },
    /// Table or column is not part of the catalog for the generation in use.
    SchemaMismatch {
        generation: SchemaGeneration,
        table: String,
        column: Option<String>,
    },
    /// A migration step failed and was rolled back.
    StepFailure {
        step: &'static str,
        target_version: u32,
        version_reached: u32,
        backup_path: Option<PathBuf>,
        source: Box<DbError>,
    },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Unique or primary-key constraint rejected a write.
    Duplicate { table: String, detail: String },
    RowNotFound { table: String, key: String },
    InvalidData(String),
}

impl DbError {
    pub(crate) fn schema_mismatch(
        generation: SchemaGeneration,
        table: &str,
        column: Option<&str>,
    ) -> Self {
        Self::SchemaMismatch {
            generation,
            table: table.to_string(),
            column: column.map(str::to_string),
        }
    }

    pub(crate) fn unsupported_version(db_version: u32) -> Self {
        Self::VersionUnsupported {
            db_version,
            oldest_supported: OLDEST_MIGRATABLE_VERSION,
            latest_supported: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::NotFound(path) => write!(f, "database file not found: {}", path.display()),
            Self::Format { path, reason } => {
                write!(f, "`{}` is not a LogIT database: {reason}", path.display())
            }
            Self::VersionUnsupported {
                db_version,
                oldest_supported,
                latest_supported,
            } => {
                if db_version > latest_supported {
                    write!(
                        f,
                        "database schema version {db_version} is newer than supported {latest_supported}; please upgrade LogIT"
                    )
                } else if db_version < oldest_supported {
                    write!(
                        f,
                        "database schema version {db_version} predates the oldest migratable version {oldest_supported}"
                    )
                } else {
                    write!(
                        f,
                        "database schema version {db_version} requires migration to {latest_supported}"
                    )
                }
            }
            Self::SchemaMismatch {
                generation,
                table,
                column: Some(column),
            } => write!(
                f,
                "column `{column}` does not exist in {generation} table `{table}`"
            ),
            Self::SchemaMismatch {
                generation,
                table,
                column: None,
            } => write!(f, "table `{table}` does not exist in {generation} schema"),
            Self::StepFailure {
                step,
                target_version,
                version_reached,
                source,
                ..
            } => write!(
                f,
                "migration step `{step}` (to version {target_version}) failed after reaching version {version_reached}: {source}"
            ),
            Self::Io { path, source } => write!(f, "i/o error on `{}`: {source}", path.display()),
            Self::Duplicate { table, detail } => {
                write!(f, "duplicate record in `{table}`: {detail}")
            }
            Self::RowNotFound { table, key } => write!(f, "no row `{key}` in `{table}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::StepFailure { source, .. } => Some(source.as_ref()),
            Self::Io { source, .. } => Some(source),
            Self::NotFound(_)
            | Self::Format { .. }
            | Self::VersionUnsupported { .. }
            | Self::SchemaMismatch { .. }
            | Self::Duplicate { .. }
            | Self::RowNotFound { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{DbError, SchemaGeneration, CURRENT_SCHEMA_VERSION};

    #[test]
    fn generation_switches_at_version_twenty() {
        assert_eq!(SchemaGeneration::for_version(19), SchemaGeneration::Legacy);
        assert_eq!(SchemaGeneration::for_version(20), SchemaGeneration::Current);
        assert_eq!(
            SchemaGeneration::for_version(CURRENT_SCHEMA_VERSION),
            SchemaGeneration::Current
        );
    }

    #[test]
    fn version_error_message_depends_on_direction() {
        let newer = DbError::unsupported_version(99).to_string();
        assert!(newer.contains("upgrade LogIT"));

        let older = DbError::unsupported_version(3).to_string();
        assert!(older.contains("predates"));

        let pending = DbError::unsupported_version(18).to_string();
        assert!(pending.contains("requires migration to 21"));
    }
}
