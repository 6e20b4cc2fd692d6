//! Repository layer: record access and the run log.
//!
//! # Responsibility
//! - Provide catalog-validated generic record access (`gateway`).
//! - Provide use-case oriented run log persistence (`log_repo`).
//! - Keep `new_file` flag recomputation in one place (`new_status`).
//!
//! # Invariants
//! - Repository APIs return semantic errors (`RowNotFound`, `Duplicate`) in
//!   addition to SQLite transport errors.

pub mod gateway;
pub mod log_repo;
pub mod new_status;
