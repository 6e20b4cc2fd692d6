//! Idempotent structural helpers shared by migration steps.
//!
//! Every helper checks `sqlite_master`/`table_info` before acting, so a step
//! resumed after an interrupted run does not fail on existing structure.

use crate::db::catalog::{ColumnDef, TableDef};
use crate::db::DbResult;
use log::debug;
use rusqlite::Connection;

pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Creates `table` in its shape at `version` (plus indexes) unless present.
///
/// Returns `true` when the table was created.
pub fn ensure_table(conn: &Connection, table: &TableDef, version: u32) -> DbResult<bool> {
    let existed = table_exists(conn, table.name)?;
    conn.execute_batch(&table.create_sql(version))?;
    for statement in table.index_sql(version) {
        conn.execute_batch(&statement)?;
    }
    if !existed {
        debug!(
            "event=migration_ddl module=db action=create_table table={} version={}",
            table.name, version
        );
    }
    Ok(!existed)
}

/// Adds `column` to `table` unless a column with that name already exists.
///
/// Returns `true` when the column was added.
pub fn ensure_column(conn: &Connection, table: &TableDef, column: &ColumnDef) -> DbResult<bool> {
    if column_exists(conn, table.name, column.name)? {
        return Ok(false);
    }
    conn.execute_batch(&format!(
        "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {};",
        table.name, column.name, column.definition
    ))?;
    debug!(
        "event=migration_ddl module=db action=add_column table={} column={}",
        table.name, column.name
    );
    Ok(true)
}

/// Renames `from` to `to` when `from` exists and `to` does not.
///
/// Returns `true` when a rename happened.
pub fn rename_table_if_present(conn: &Connection, from: &str, to: &str) -> DbResult<bool> {
    if !table_exists(conn, from)? || table_exists(conn, to)? {
        return Ok(false);
    }
    conn.execute_batch(&format!("ALTER TABLE \"{from}\" RENAME TO \"{to}\";"))?;
    Ok(true)
}

pub fn drop_table_if_exists(conn: &Connection, table: &str) -> DbResult<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
    Ok(())
}
