//! Transactional execution of planned migration steps.
//!
//! # Responsibility
//! - Copy the database file aside before the first step.
//! - Run each step in its own transaction and stop at the first failure.
//! - Advance the version marker only together with the final step's commit.
//!
//! # Invariants
//! - A failed step leaves no writes behind; earlier steps stay committed.
//! - The marker never claims a version whose steps have not all committed.
//! - Steps only move the marker forward, never past the application version.
//! - An existing file is never overwritten; each backup gets a fresh name.

use crate::db::migrations::MigrationStep;
use crate::db::probe::{read_schema_version, write_schema_version};
use crate::db::{DbError, DbResult, CURRENT_SCHEMA_VERSION};
use log::{error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Appended to the database file stem to name the pre-migration copy.
pub const BACKUP_SUFFIX: &str = "_backup";

const MAX_BACKUP_NAMES: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Copy the database file to `<stem>_backup.<ext>` before migrating.
    pub create_backup: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
        }
    }
}

/// Reported after every committed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    pub completed: usize,
    pub total: usize,
    pub step: &'static str,
    pub target_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Names of the steps applied, in order.
    pub applied: Vec<&'static str>,
    pub backup_path: Option<PathBuf>,
}

impl MigrationReport {
    pub(crate) fn unchanged(version: u32) -> Self {
        Self {
            from_version: version,
            to_version: version,
            applied: Vec::new(),
            backup_path: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// `dir/name.logdb` -> `dir/name_backup.logdb`.
///
/// This is the first name tried; when it is taken the runner falls back to
/// `name_backup_1.logdb`, `name_backup_2.logdb` and so on.
pub fn backup_path_for(db_path: &Path) -> PathBuf {
    numbered_backup_path(db_path, 0)
}

fn numbered_backup_path(db_path: &Path, attempt: u32) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = match attempt {
        0 => BACKUP_SUFFIX.to_string(),
        n => format!("{BACKUP_SUFFIX}_{n}"),
    };
    let file_name = match db_path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    db_path.with_file_name(file_name)
}

/// Applies `steps` in order on `conn`.
///
/// `steps` must be strictly ascending by target version. `on_progress` runs
/// after each committed step; it is the only point where a caller may stop.
///
/// # Errors
/// - `InvalidData` when the steps are out of order, do not move past the
///   current marker, or target a version this build does not know.
/// - `Io` when the backup copy fails (nothing migrated).
/// - `StepFailure` when a step fails; earlier steps remain committed and the
///   version marker is unchanged.
pub fn run_migration_steps<F>(
    conn: &mut Connection,
    steps: &[&MigrationStep],
    options: &MigrateOptions,
    mut on_progress: F,
) -> DbResult<MigrationReport>
where
    F: FnMut(MigrationProgress),
{
    let from_version = read_schema_version(conn)?;
    if steps.is_empty() {
        return Ok(MigrationReport::unchanged(from_version));
    }
    ensure_ascending(steps)?;
    ensure_forward(steps, from_version)?;

    let started_at = Instant::now();
    info!(
        "event=migration_run module=db status=start from_version={} steps={}",
        from_version,
        steps.len()
    );

    let backup_path = if options.create_backup {
        backup_database(conn)?
    } else {
        None
    };

    let total = steps.len();
    let mut applied = Vec::with_capacity(total);
    let mut version_reached = from_version;
    for (index, step) in steps.iter().enumerate() {
        let is_final = index + 1 == total;
        if let Err(err) = apply_step(conn, step, is_final) {
            error!(
                "event=migration_step module=db status=error step={} target_version={} duration_ms={} error={}",
                step.name(),
                step.target_version(),
                started_at.elapsed().as_millis(),
                err
            );
            return Err(DbError::StepFailure {
                step: step.name(),
                target_version: step.target_version(),
                version_reached,
                backup_path,
                source: Box::new(err),
            });
        }

        version_reached = step.target_version();
        applied.push(step.name());
        info!(
            "event=migration_step module=db status=ok step={} target_version={} completed={}/{}",
            step.name(),
            step.target_version(),
            index + 1,
            total
        );
        on_progress(MigrationProgress {
            completed: index + 1,
            total,
            step: step.name(),
            target_version: step.target_version(),
        });
    }

    info!(
        "event=migration_run module=db status=ok from_version={} to_version={} duration_ms={}",
        from_version,
        version_reached,
        started_at.elapsed().as_millis()
    );
    Ok(MigrationReport {
        from_version,
        to_version: version_reached,
        applied,
        backup_path,
    })
}

fn apply_step(conn: &mut Connection, step: &MigrationStep, write_marker: bool) -> DbResult<()> {
    let tx = Transaction::new(conn, TransactionBehavior::Immediate)?;
    step.apply(&tx)?;
    if write_marker {
        write_schema_version(&tx, step.target_version())?;
    }
    tx.commit()?;
    Ok(())
}

fn ensure_ascending(steps: &[&MigrationStep]) -> DbResult<()> {
    for pair in steps.windows(2) {
        if pair[0].target_version() >= pair[1].target_version() {
            return Err(DbError::InvalidData(format!(
                "migration steps out of order: `{}` ({}) before `{}` ({})",
                pair[0].name(),
                pair[0].target_version(),
                pair[1].name(),
                pair[1].target_version()
            )));
        }
    }
    Ok(())
}

fn ensure_forward(steps: &[&MigrationStep], from_version: u32) -> DbResult<()> {
    let (Some(first), Some(last)) = (steps.first(), steps.last()) else {
        return Ok(());
    };
    if first.target_version() <= from_version {
        return Err(DbError::InvalidData(format!(
            "migration step `{}` targets version {} but the database is already at version {}",
            first.name(),
            first.target_version(),
            from_version
        )));
    }
    if last.target_version() > CURRENT_SCHEMA_VERSION {
        return Err(DbError::InvalidData(format!(
            "migration step `{}` targets version {} beyond the supported version {}",
            last.name(),
            last.target_version(),
            CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// Copies the main database file to the first free backup name.
///
/// `None` for in-memory connections.
fn backup_database(conn: &Connection) -> DbResult<Option<PathBuf>> {
    let db_path: String = conn.query_row("PRAGMA database_list;", [], |row| row.get(2))?;
    if db_path.is_empty() {
        return Ok(None);
    }

    let db_path = PathBuf::from(db_path);
    let mut source = File::open(&db_path).map_err(|source| DbError::Io {
        path: db_path.clone(),
        source,
    })?;
    for attempt in 0..MAX_BACKUP_NAMES {
        let backup_path = numbered_backup_path(&db_path, attempt);
        let mut target = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&backup_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(backup_error(backup_path, source)),
        };
        if let Err(source) = io::copy(&mut source, &mut target) {
            drop(target);
            // Only the file created above is removed.
            let _ = std::fs::remove_file(&backup_path);
            return Err(backup_error(backup_path, source));
        }
        info!(
            "event=migration_backup module=db status=ok backup={}",
            backup_path.display()
        );
        return Ok(Some(backup_path));
    }

    Err(backup_error(
        backup_path_for(&db_path),
        io::Error::new(ErrorKind::AlreadyExists, "no free backup file name"),
    ))
}

fn backup_error(backup_path: PathBuf, source: io::Error) -> DbError {
    error!(
        "event=migration_backup module=db status=error backup={} error={}",
        backup_path.display(),
        source
    );
    DbError::Io {
        path: backup_path,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::{backup_path_for, numbered_backup_path};
    use std::path::Path;

    #[test]
    fn backup_name_keeps_directory_and_extension() {
        assert_eq!(
            backup_path_for(Path::new("/models/river.logdb")),
            Path::new("/models/river_backup.logdb")
        );
        assert_eq!(
            backup_path_for(Path::new("plain")),
            Path::new("plain_backup")
        );
        assert_eq!(
            numbered_backup_path(Path::new("/models/river.logdb"), 2),
            Path::new("/models/river_backup_2.logdb")
        );
    }
}
