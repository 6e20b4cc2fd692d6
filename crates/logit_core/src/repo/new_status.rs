//! Recomputation of `new_file` flags on association tables.
//!
//! # Invariants
//! - After a refresh, exactly the chronologically first row of each grouping
//!   (`timestamp ASC, id ASC`) has `new_file = 1`.
//! - Groupings: `Run_ModelFile` per model file, `ModelFile_SubFile` per
//!   (model type, sub-file), `Run_SubFile` per sub-file, `Run_Ied` per ied.

use crate::db::catalog::current;
use crate::db::DbResult;
use rusqlite::Connection;
use serde::Serialize;

/// Number of rows whose flag flipped, per association table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NewStatusSummary {
    pub run_model_file: usize,
    pub model_file_sub_file: usize,
    pub run_sub_file: usize,
    pub run_ied: usize,
}

impl NewStatusSummary {
    pub fn total(&self) -> usize {
        self.run_model_file + self.model_file_sub_file + self.run_sub_file + self.run_ied
    }
}

/// Refreshes every association table. Caller owns the transaction.
pub fn refresh_all(conn: &Connection) -> DbResult<NewStatusSummary> {
    Ok(NewStatusSummary {
        run_model_file: refresh_run_model_file(conn)?,
        model_file_sub_file: refresh_model_file_sub_file(conn)?,
        run_sub_file: refresh_run_sub_file(conn)?,
        run_ied: refresh_run_ied(conn)?,
    })
}

pub fn refresh_run_model_file(conn: &Connection) -> DbResult<usize> {
    refresh_first_per_column(conn, current::RUN_MODEL_FILE.name, "model_file_id")
}

pub fn refresh_run_sub_file(conn: &Connection) -> DbResult<usize> {
    refresh_first_per_column(conn, current::RUN_SUB_FILE.name, "sub_file_id")
}

pub fn refresh_run_ied(conn: &Connection) -> DbResult<usize> {
    refresh_first_per_column(conn, current::RUN_IED.name, "ied_id")
}

pub fn refresh_model_file_sub_file(conn: &Connection) -> DbResult<usize> {
    let first_of_group = "(CASE WHEN ModelFile_SubFile.id = (
            SELECT x.id
            FROM ModelFile_SubFile x
            JOIN ModelFile m ON m.name = x.model_file_id
            WHERE x.sub_file_id = ModelFile_SubFile.sub_file_id
              AND m.model_type = (
                SELECT model_type FROM ModelFile WHERE name = ModelFile_SubFile.model_file_id
              )
            ORDER BY x.timestamp ASC, x.id ASC
            LIMIT 1
        ) THEN 1 ELSE 0 END)";
    let changed = conn.execute(
        &format!(
            "UPDATE ModelFile_SubFile
             SET new_file = {first_of_group}
             WHERE new_file IS NOT {first_of_group};"
        ),
        [],
    )?;
    Ok(changed)
}

// `table`/`group_column` are catalog constants, never caller input.
fn refresh_first_per_column(conn: &Connection, table: &str, group_column: &str) -> DbResult<usize> {
    let first_of_group = format!(
        "(CASE WHEN \"{table}\".id = (
            SELECT x.id
            FROM \"{table}\" x
            WHERE x.{group_column} = \"{table}\".{group_column}
            ORDER BY x.timestamp ASC, x.id ASC
            LIMIT 1
        ) THEN 1 ELSE 0 END)"
    );
    let changed = conn.execute(
        &format!(
            "UPDATE \"{table}\"
             SET new_file = {first_of_group}
             WHERE new_file IS NOT {first_of_group};"
        ),
        [],
    )?;
    Ok(changed)
}
