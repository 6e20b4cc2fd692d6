//! Version 21: `Run_SubFile` associations.
//!
//! The table cannot be filled from any single source row; each pair is
//! re-derived from the surviving `Run_ModelFile -> ModelFile_SubFile` chain.

use crate::db::catalog::current;
use crate::db::migrations::ddl::ensure_table;
use crate::db::DbResult;
use crate::repo::new_status;
use log::info;
use rusqlite::Connection;

pub fn add_run_sub_file_associations(conn: &Connection) -> DbResult<()> {
    ensure_table(conn, &current::RUN_SUB_FILE, 21)?;
    let inserted = backfill_run_sub_files(conn)?;
    new_status::refresh_run_sub_file(conn)?;
    info!(
        "event=migration_backfill module=db step=run_sub_file_associations inserted={}",
        inserted
    );
    Ok(())
}

/// Inserts one row per reachable (run, sub-file) pair not already present.
pub(crate) fn backfill_run_sub_files(conn: &Connection) -> DbResult<usize> {
    let inserted = conn.execute(
        "INSERT INTO Run_SubFile (run_id, sub_file_id, new_file, timestamp)
         SELECT DISTINCT rm.run_id, ms.sub_file_id, 0, r.timestamp
         FROM Run_ModelFile rm
         JOIN ModelFile_SubFile ms ON ms.model_file_id = rm.model_file_id
         JOIN Run r ON r.id = rm.run_id
         WHERE NOT EXISTS (
             SELECT 1
             FROM Run_SubFile rs
             WHERE rs.run_id = rm.run_id AND rs.sub_file_id = ms.sub_file_id
         )
         ORDER BY rm.run_id ASC, ms.sub_file_id ASC;",
        [],
    )?;
    Ok(inserted)
}
