//! Domain model for logged model runs.
//!
//! # Responsibility
//! - Define the records a run log entry is made of.
//! - Keep content-hash derivation in one place for new and migrated runs.
//!
//! # Invariants
//! - A run is identified by its integer `RunId` and its unique `run_hash`.
//! - Files (dat, model files, sub-files, ieds) are identified by name.

pub mod entry;
pub mod files;
pub mod run;
