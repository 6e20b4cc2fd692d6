//! Structural steps inside the legacy (raw-SQL) generation.
//!
//! Both steps are no-ops once the legacy `RUN` table is gone, which happens
//! when a later normalization step committed but the version marker was not
//! yet advanced.

use crate::db::catalog::legacy;
use crate::db::migrations::ddl::{ensure_column, ensure_table, table_exists};
use crate::db::DbResult;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;

static LIST_BRACKETS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?:\[(.*)\]|\((.*)\))\s*$").expect("valid list bracket regex")
});
static LIST_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[,;]\s*").expect("valid list separator regex"));

/// Version 18: `RUN.EVENT_NAME` and `RUN.RUN_OPTIONS`.
pub fn add_run_event_columns(conn: &Connection) -> DbResult<()> {
    if !table_exists(conn, legacy::RUN.name)? {
        debug!("event=migration_step module=db step=legacy_run_event_columns status=skip reason=no_legacy_run");
        return Ok(());
    }
    for column in legacy::RUN.columns.iter().filter(|column| column.added_in == 18) {
        ensure_column(conn, &legacy::RUN, column)?;
    }
    Ok(())
}

/// Version 19: `BC_DBASE` model table and its `_FILES` side table.
pub fn create_bc_dbase_tables(conn: &Connection) -> DbResult<()> {
    if !table_exists(conn, legacy::RUN.name)? {
        debug!("event=migration_step module=db step=legacy_bc_dbase_tables status=skip reason=no_legacy_run");
        return Ok(());
    }
    ensure_table(conn, &legacy::BC_DBASE, 19)?;
    ensure_table(conn, &legacy::BC_DBASE_FILES, 19)?;
    Ok(())
}

/// Splits a legacy delimited file list.
///
/// Accepts `,`/`;` separators, optional brackets and quotes; drops blanks,
/// the `None` placeholder and repeated names (first occurrence kept).
pub(crate) fn parse_file_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let inner = LIST_BRACKETS_RE
        .captures(raw)
        .and_then(|captures| captures.get(1).or_else(|| captures.get(2)))
        .map_or(raw, |inner| inner.as_str());

    let mut names: Vec<String> = Vec::new();
    for part in LIST_SEPARATOR_RE.split(inner) {
        let Some(name) = parse_file_name(Some(part)) else {
            continue;
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Reads a legacy single-name column; separators are part of the name.
///
/// Surrounding whitespace and quotes are dropped; blanks and `None` read as
/// no name.
pub(crate) fn parse_file_name(raw: Option<&str>) -> Option<String> {
    let name = raw?.trim().trim_matches(['\'', '"']).trim();
    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::{add_run_event_columns, create_bc_dbase_tables, parse_file_list, parse_file_name};
    use crate::db::catalog::legacy;
    use crate::db::migrations::ddl::{column_exists, table_exists};
    use rusqlite::Connection;

    #[test]
    fn parse_file_list_handles_legacy_spellings() {
        assert_eq!(
            parse_file_list(Some("a.shp, b.shp;c.csv")),
            vec!["a.shp", "b.shp", "c.csv"]
        );
        assert_eq!(
            parse_file_list(Some("['2d_zln.shp', \"2d_code.mif\"]")),
            vec!["2d_zln.shp", "2d_code.mif"]
        );
        assert_eq!(parse_file_list(Some("x.tgc, , None, x.tgc")), vec!["x.tgc"]);
        assert!(parse_file_list(Some("None")).is_empty());
        assert!(parse_file_list(None).is_empty());
        assert_eq!(
            parse_file_list(Some("run(1).tgc, run(2).tgc")),
            vec!["run(1).tgc", "run(2).tgc"]
        );
    }

    #[test]
    fn parse_file_name_keeps_separators_inside_names() {
        assert_eq!(
            parse_file_name(Some(" 'river, reach;2.dat' ")).as_deref(),
            Some("river, reach;2.dat")
        );
        assert_eq!(parse_file_name(Some("a(1).tgc")).as_deref(), Some("a(1).tgc"));
        assert_eq!(parse_file_name(Some("None")), None);
        assert_eq!(parse_file_name(Some("  ")), None);
        assert_eq!(parse_file_name(None), None);
    }

    #[test]
    fn legacy_steps_run_twice_without_error() {
        let conn = Connection::open_in_memory().unwrap();
        for table in legacy::TABLES.iter().filter(|table| table.exists_at(17)) {
            conn.execute_batch(&table.create_sql(17)).unwrap();
        }

        add_run_event_columns(&conn).unwrap();
        add_run_event_columns(&conn).unwrap();
        create_bc_dbase_tables(&conn).unwrap();
        create_bc_dbase_tables(&conn).unwrap();

        assert!(column_exists(&conn, "RUN", "EVENT_NAME").unwrap());
        assert!(column_exists(&conn, "RUN", "RUN_OPTIONS").unwrap());
        assert!(table_exists(&conn, "BC_DBASE").unwrap());
        assert!(table_exists(&conn, "BC_DBASE_FILES").unwrap());
    }

    #[test]
    fn legacy_steps_skip_normalized_databases() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Run (id INTEGER PRIMARY KEY);")
            .unwrap();

        add_run_event_columns(&conn).unwrap();
        create_bc_dbase_tables(&conn).unwrap();

        assert!(!column_exists(&conn, "Run", "EVENT_NAME").unwrap());
        assert!(!table_exists(&conn, "BC_DBASE").unwrap());
    }
}
