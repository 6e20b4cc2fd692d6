//! Migration registry, planner and entry point.
//!
//! # Responsibility
//! - Register schema migration steps in strictly increasing version order.
//! - Plan the steps needed to bring a database to `CURRENT_SCHEMA_VERSION`.
//! - Drive probe, backup and transactional execution for a database file.
//!
//! # Invariants
//! - Target versions are unique and ascending.
//! - Every step is idempotent; re-running a committed step changes nothing.
//! - Files newer than this build, or older than the oldest migratable
//!   version, are never opened for writing.

use crate::db::probe::{probe_version, VersionStatus};
use crate::db::{
    open, DbError, DbResult, CURRENT_SCHEMA_VERSION, OLDEST_MIGRATABLE_VERSION,
};
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::path::Path;

pub mod ddl;
mod legacy;
mod normalize;
mod run_sub_file;
pub mod runner;

pub use runner::{
    backup_path_for, run_migration_steps, MigrateOptions, MigrationProgress, MigrationReport,
    BACKUP_SUFFIX,
};

/// Transformation executed inside the runner's per-step transaction.
pub type StepFn = fn(&Connection) -> DbResult<()>;

/// One registered schema transformation.
#[derive(Clone, Copy)]
pub struct MigrationStep {
    name: &'static str,
    target_version: u32,
    apply: StepFn,
}

impl MigrationStep {
    pub const fn new(name: &'static str, target_version: u32, apply: StepFn) -> Self {
        Self {
            name,
            target_version,
            apply,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    pub fn apply(&self, conn: &Connection) -> DbResult<()> {
        (self.apply)(conn)
    }
}

impl Debug for MigrationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("name", &self.name)
            .field("target_version", &self.target_version)
            .finish_non_exhaustive()
    }
}

impl PartialEq for MigrationStep {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.target_version == other.target_version
    }
}

impl Eq for MigrationStep {}

const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep::new("legacy_run_event_columns", 18, legacy::add_run_event_columns),
    MigrationStep::new("legacy_bc_dbase_tables", 19, legacy::create_bc_dbase_tables),
    MigrationStep::new("normalize_legacy_tables", 20, normalize::normalize_legacy_tables),
    MigrationStep::new(
        "run_sub_file_associations",
        21,
        run_sub_file::add_run_sub_file_associations,
    ),
];

/// Every registered step, ascending by target version.
pub fn registry() -> &'static [MigrationStep] {
    MIGRATIONS
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS
        .last()
        .map_or(OLDEST_MIGRATABLE_VERSION, |step| step.target_version)
}

/// What `plan` decided for a given persisted version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationPlan {
    UpToDate,
    NewerThanApplication { db_version: u32 },
    UnsupportedLegacy { db_version: u32 },
    /// Steps to run, ascending; never empty.
    Pending(Vec<&'static MigrationStep>),
}

/// Selects the steps with `db_version < target_version <= CURRENT_SCHEMA_VERSION`.
pub fn plan(db_version: u32) -> MigrationPlan {
    if db_version == CURRENT_SCHEMA_VERSION {
        return MigrationPlan::UpToDate;
    }
    if db_version > CURRENT_SCHEMA_VERSION {
        return MigrationPlan::NewerThanApplication { db_version };
    }
    if db_version < OLDEST_MIGRATABLE_VERSION {
        return MigrationPlan::UnsupportedLegacy { db_version };
    }

    let steps: Vec<_> = MIGRATIONS
        .iter()
        .filter(|step| {
            step.target_version > db_version && step.target_version <= CURRENT_SCHEMA_VERSION
        })
        .collect();
    if steps.is_empty() {
        MigrationPlan::UpToDate
    } else {
        MigrationPlan::Pending(steps)
    }
}

/// Migrates the database at `path` to `CURRENT_SCHEMA_VERSION`.
///
/// # Errors
/// - `NotFound`/`Format` from probing.
/// - `VersionUnsupported` for newer or pre-17 files (file untouched).
/// - `Io` when the backup cannot be written.
/// - `StepFailure` when a step fails.
pub fn migrate(path: impl AsRef<Path>, options: &MigrateOptions) -> DbResult<MigrationReport> {
    migrate_with_progress(path, options, |_| {})
}

/// Like `migrate`, reporting each committed step to `on_progress`.
pub fn migrate_with_progress<F>(
    path: impl AsRef<Path>,
    options: &MigrateOptions,
    on_progress: F,
) -> DbResult<MigrationReport>
where
    F: FnMut(MigrationProgress),
{
    let path = path.as_ref();
    let report = probe_version(path)?;
    match report.status {
        VersionStatus::Same => return Ok(MigrationReport::unchanged(report.db_version)),
        VersionStatus::Higher | VersionStatus::UnsupportedLegacy => {
            return Err(DbError::unsupported_version(report.db_version));
        }
        VersionStatus::Lower => {}
    }

    let MigrationPlan::Pending(steps) = plan(report.db_version) else {
        return Ok(MigrationReport::unchanged(report.db_version));
    };
    let mut conn = open::open_configured(path)?;
    run_migration_steps(&mut conn, &steps, options, on_progress)
}
