//! Core storage logic for LogIT.
//! Schema versioning, migration and record access for `.logdb` run logs.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::catalog::SchemaCatalog;
pub use db::migrations::{
    migrate, migrate_with_progress, plan, MigrateOptions, MigrationPlan, MigrationProgress,
    MigrationReport, MigrationStep,
};
pub use db::probe::{probe_version, ProbeReport, VersionStatus};
pub use db::{
    create_db, open_db, open_db_in_memory, DbError, DbResult, SchemaGeneration,
    CURRENT_SCHEMA_VERSION,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entry::{LogEntry, LogEntryError, ModelFileEntry};
pub use model::files::{Dat, Ied, ModelFile, ModelFileKind, RunModelFile, RunSubFile};
pub use model::run::{Run, RunDetails, RunId};
pub use repo::gateway::{Record, RecordGateway};
pub use repo::log_repo::{RunDeletion, RunListQuery, RunLogRepository, SqliteRunLogRepository};
pub use service::log_service::{LogService, LogServiceError, OrphanSweep};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
