//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Create new `.logdb` files with the current schema.
//! - Open existing files, migrating older ones first.
//! - Configure connection pragmas required by core behavior.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Connections returned by `open_db`/`create_db`/`open_db_in_memory` are at
//!   `CURRENT_SCHEMA_VERSION`.

use super::catalog::SchemaCatalog;
use super::migrations::{migrate, MigrateOptions};
use super::probe::{ensure_database_path, ensure_extension, write_schema_version};
use super::{DbError, DbResult, SchemaGeneration, CURRENT_SCHEMA_VERSION};
use log::{error, info};
use rusqlite::Connection;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};

/// Creates a new database file at `path` with the current schema.
///
/// # Errors
/// - `Format` when the extension is not `.logdb`.
/// - `Io` (`AlreadyExists`) when the file is already present.
pub fn create_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=db_create module=db status=start");

    let result = ensure_extension(path)
        .and_then(|()| {
            if path.exists() {
                Err(DbError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "database file already exists",
                    ),
                })
            } else {
                Ok(())
            }
        })
        .and_then(|()| {
            let mut conn = open_configured(path)?;
            initialize_current_schema(&mut conn)?;
            Ok(conn)
        });

    match result {
        Ok(conn) => {
            info!(
                "event=db_create module=db status=ok version={} duration_ms={}",
                CURRENT_SCHEMA_VERSION,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_create module=db status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens an existing database file, migrating it to the current version.
///
/// # Side effects
/// - May write a `<stem>_backup.logdb` copy and migrate in place.
/// - Emits `db_open` logging events with duration and status.
///
/// # Errors
/// - `NotFound`/`Format` for missing or foreign files.
/// - `VersionUnsupported` for files this build cannot migrate.
/// - `StepFailure` when migration fails.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let result = ensure_database_path(path)
        .and_then(|()| migrate(path, &MigrateOptions::default()))
        .and_then(|_| open_configured(path));

    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok mode=file duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=file duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens an in-memory SQLite database with the current schema.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let result = Connection::open_in_memory()
        .map_err(DbError::from)
        .and_then(|mut conn| {
            configure_connection(&conn)?;
            initialize_current_schema(&mut conn)?;
            Ok(conn)
        });

    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok mode=memory duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=memory duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens `path` read-write with pragmas applied; no version handling.
pub(crate) fn open_configured(path: &Path) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    configure_connection(&conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn initialize_current_schema(conn: &mut Connection) -> DbResult<()> {
    let tx = conn.transaction()?;
    for statement in SchemaCatalog::for_generation(SchemaGeneration::Current)
        .create_sql(CURRENT_SCHEMA_VERSION)
    {
        tx.execute_batch(&statement)?;
    }
    write_schema_version(&tx, CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}
