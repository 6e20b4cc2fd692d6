//! Read-only schema version detection.
//!
//! # Responsibility
//! - Validate that a path names an existing LogIT database file.
//! - Read the persisted version marker and classify it against this build.
//!
//! # Invariants
//! - Probing never writes: the file is opened with `SQLITE_OPEN_READ_ONLY`.
//! - Missing files and foreign formats are typed errors, not statuses.

use crate::db::{
    DbError, DbResult, CURRENT_SCHEMA_VERSION, DATABASE_FILE_EXTENSION,
    OLDEST_MIGRATABLE_VERSION,
};
use log::{error, info};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Relation between a database file's version and this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Versions match; nothing to do.
    Same,
    /// File was written by a newer LogIT; refuse to touch it.
    Higher,
    /// File is older but migratable.
    Lower,
    /// File predates the oldest version the migrator understands.
    UnsupportedLegacy,
}

/// Outcome of `probe_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub path: PathBuf,
    pub db_version: u32,
    pub app_version: u32,
    pub status: VersionStatus,
}

/// Classifies a persisted version against `CURRENT_SCHEMA_VERSION`.
pub fn classify_version(db_version: u32) -> VersionStatus {
    if db_version == CURRENT_SCHEMA_VERSION {
        VersionStatus::Same
    } else if db_version > CURRENT_SCHEMA_VERSION {
        VersionStatus::Higher
    } else if db_version >= OLDEST_MIGRATABLE_VERSION {
        VersionStatus::Lower
    } else {
        VersionStatus::UnsupportedLegacy
    }
}

/// Probes the schema version of the database at `path`.
///
/// # Errors
/// - `NotFound` when the file does not exist.
/// - `Format` when the extension is not `.logdb`, the file is not SQLite, or it
///   carries no LogIT run table.
pub fn probe_version(path: impl AsRef<Path>) -> DbResult<ProbeReport> {
    let path = path.as_ref();
    match probe_inner(path) {
        Ok(report) => {
            info!(
                "event=version_probe module=db status=ok db_version={} app_version={} outcome={:?}",
                report.db_version, report.app_version, report.status
            );
            Ok(report)
        }
        Err(err) => {
            error!(
                "event=version_probe module=db status=error error={}",
                err
            );
            Err(err)
        }
    }
}

fn probe_inner(path: &Path) -> DbResult<ProbeReport> {
    ensure_database_path(path)?;

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| format_error(path, err))?;

    let db_version = read_schema_version(&conn).map_err(|err| match err {
        DbError::Sqlite(inner) => format_error(path, inner),
        other => other,
    })?;

    if !has_run_table(&conn).map_err(|err| format_error(path, err))? {
        return Err(DbError::Format {
            path: path.to_path_buf(),
            reason: "no RUN or Run table".to_string(),
        });
    }

    Ok(ProbeReport {
        path: path.to_path_buf(),
        db_version,
        app_version: CURRENT_SCHEMA_VERSION,
        status: classify_version(db_version),
    })
}

/// Checks existence and the `.logdb` extension.
pub(crate) fn ensure_database_path(path: &Path) -> DbResult<()> {
    if !path.exists() {
        return Err(DbError::NotFound(path.to_path_buf()));
    }
    ensure_extension(path)
}

pub(crate) fn ensure_extension(path: &Path) -> DbResult<()> {
    let matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DATABASE_FILE_EXTENSION));
    if matches {
        Ok(())
    } else {
        Err(DbError::Format {
            path: path.to_path_buf(),
            reason: format!("expected a `.{DATABASE_FILE_EXTENSION}` file"),
        })
    }
}

/// Reads `PRAGMA user_version`.
pub fn read_schema_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Writes `PRAGMA user_version`. Participates in the caller's transaction.
pub fn write_schema_version(conn: &Connection, version: u32) -> DbResult<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    Ok(())
}

fn has_run_table(conn: &Connection) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'Run' COLLATE NOCASE
        );",
        [],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn format_error(path: &Path, err: rusqlite::Error) -> DbError {
    let not_a_database = matches!(
        &err,
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::NotADatabase
    );
    if not_a_database {
        DbError::Format {
            path: path.to_path_buf(),
            reason: "file is not a SQLite database".to_string(),
        }
    } else {
        DbError::Sqlite(err)
    }
}
