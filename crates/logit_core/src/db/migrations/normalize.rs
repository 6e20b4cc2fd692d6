//! Version 20: move the legacy raw-SQL tables into the normalized layout.
//!
//! Legacy tables are first renamed to `legacy_<NAME>` because `RUN`/`DAT`
//! collide with `Run`/`Dat` (SQLite identifiers are case-insensitive). The
//! current tables are then created, every legacy row is backfilled through
//! the `RecordGateway`, and the renamed tables are dropped last.

use crate::db::catalog::{current, legacy, TableDef};
use crate::db::migrations::ddl::{
    drop_table_if_exists, ensure_table, rename_table_if_present, table_exists,
};
use crate::db::migrations::legacy::{parse_file_list, parse_file_name};
use crate::db::{DbResult, FIRST_CURRENT_GENERATION_VERSION};
use crate::model::run::legacy_run_hash;
use crate::repo::gateway::RecordGateway;
use crate::repo::new_status;
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, Connection};

const LEGACY_PREFIX: &str = "legacy_";

pub fn normalize_legacy_tables(conn: &Connection) -> DbResult<()> {
    let legacy_present = table_exists(conn, legacy::RUN.name)?;
    if legacy_present {
        for table in legacy::TABLES {
            rename_table_if_present(conn, table.name, &renamed(table))?;
        }
    }

    for table in current::TABLES
        .iter()
        .filter(|table| table.exists_at(FIRST_CURRENT_GENERATION_VERSION))
    {
        ensure_table(conn, table, FIRST_CURRENT_GENERATION_VERSION)?;
    }

    if !legacy_present {
        return Ok(());
    }

    let gateway = RecordGateway::new(conn, FIRST_CURRENT_GENERATION_VERSION);
    let dats = backfill_dats(conn, &gateway)?;
    let model_files = backfill_model_files(conn, &gateway)?;
    let runs = backfill_runs(conn, &gateway)?;
    new_status::refresh_run_model_file(conn)?;

    for table in legacy::TABLES {
        drop_table_if_exists(conn, &renamed(table))?;
    }

    info!(
        "event=migration_backfill module=db step=normalize_legacy_tables dats={} model_files={} runs={}",
        dats, model_files, runs
    );
    Ok(())
}

fn renamed(table: &TableDef) -> String {
    format!("{LEGACY_PREFIX}{}", table.name)
}

fn backfill_dats(conn: &Connection, gateway: &RecordGateway<'_>) -> DbResult<usize> {
    let source = renamed(&legacy::DAT);
    if !table_exists(conn, &source)? {
        return Ok(0);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT
            CAST(DAT AS TEXT),
            COALESCE(CAST(AMENDMENTS AS TEXT), ''),
            COALESCE(CAST(COMMENTS AS TEXT), ''),
            COALESCE(CAST(DATE AS TEXT), CURRENT_TIMESTAMP)
         FROM \"{source}\"
         ORDER BY ID ASC;"
    ))?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let raw_name: Option<String> = row.get(0)?;
        let Some(name) = parse_file_name(raw_name.as_deref()) else {
            continue;
        };
        let amendments: String = row.get(1)?;
        let comments: String = row.get(2)?;
        let timestamp: String = row.get(3)?;

        let inserted = gateway.insert_if_absent(
            current::DAT.name,
            &[
                ("name", Value::from(name.clone())),
                ("amendments", Value::from(amendments.clone())),
                ("comments", Value::from(comments.clone())),
                ("timestamp", Value::from(timestamp)),
            ],
        )?;
        if inserted {
            count += 1;
        } else {
            // Duplicate legacy rows only fill fields the first row left blank.
            conn.execute(
                "UPDATE Dat
                 SET amendments = CASE WHEN amendments = '' THEN ?2 ELSE amendments END,
                     comments = CASE WHEN comments = '' THEN ?3 ELSE comments END
                 WHERE name = ?1;",
                params![name, amendments, comments],
            )?;
        }
    }
    Ok(count)
}

fn backfill_model_files(conn: &Connection, gateway: &RecordGateway<'_>) -> DbResult<usize> {
    let mut count = 0;
    for model_type in legacy::MODEL_TYPES {
        let main = format!("{LEGACY_PREFIX}{model_type}");
        if table_exists(conn, &main)? {
            let mut stmt = conn.prepare(&format!(
                "SELECT
                    CAST(\"{model_type}\" AS TEXT),
                    CAST(FILES AS TEXT),
                    CAST(NEW_FILES AS TEXT),
                    COALESCE(CAST(COMMENTS AS TEXT), ''),
                    COALESCE(CAST(DATE AS TEXT), CURRENT_TIMESTAMP)
                 FROM \"{main}\"
                 ORDER BY ID ASC;"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let raw_name: Option<String> = row.get(0)?;
                let Some(name) = parse_file_name(raw_name.as_deref()) else {
                    continue;
                };
                let files: Option<String> = row.get(1)?;
                let new_files = parse_file_list(row.get::<_, Option<String>>(2)?.as_deref());
                let comments: String = row.get(3)?;
                let timestamp: String = row.get(4)?;

                if ensure_model_file(gateway, &name, model_type, &comments, &timestamp)? {
                    count += 1;
                }

                let mut sub_files = parse_file_list(files.as_deref());
                for extra in &new_files {
                    if !sub_files.contains(extra) {
                        sub_files.push(extra.clone());
                    }
                }
                for sub_file in sub_files {
                    let is_new = new_files.contains(&sub_file);
                    link_sub_file(gateway, &name, &sub_file, is_new, &timestamp)?;
                }
            }
        }

        let side = format!("{LEGACY_PREFIX}{model_type}_FILES");
        if table_exists(conn, &side)? {
            let mut stmt = conn.prepare(&format!(
                "SELECT
                    CAST(\"{model_type}\" AS TEXT),
                    CAST(FILES AS TEXT),
                    COALESCE(CAST(DATE AS TEXT), CURRENT_TIMESTAMP)
                 FROM \"{side}\"
                 ORDER BY ID ASC;"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let raw_name: Option<String> = row.get(0)?;
                let Some(name) = parse_file_name(raw_name.as_deref()) else {
                    continue;
                };
                let files: Option<String> = row.get(1)?;
                let timestamp: String = row.get(2)?;

                if ensure_model_file(gateway, &name, model_type, "", &timestamp)? {
                    count += 1;
                }
                if let Some(sub_file) = parse_file_name(files.as_deref()) {
                    link_sub_file(gateway, &name, &sub_file, false, &timestamp)?;
                }
            }
        }
    }
    Ok(count)
}

fn backfill_runs(conn: &Connection, gateway: &RecordGateway<'_>) -> DbResult<usize> {
    let source = renamed(&legacy::RUN);
    let mut stmt = conn.prepare(&format!(
        "SELECT
            ID,
            COALESCE(CAST(DATE AS TEXT), CURRENT_TIMESTAMP),
            COALESCE(CAST(MODELLER AS TEXT), ''),
            COALESCE(CAST(SETUP AS TEXT), ''),
            COALESCE(CAST(COMMENTS AS TEXT), ''),
            COALESCE(CAST(IEF AS TEXT), ''),
            COALESCE(CAST(TCF AS TEXT), ''),
            COALESCE(CAST(INITIAL_CONDITIONS AS TEXT), ''),
            COALESCE(CAST(ISIS_RESULTS AS TEXT), ''),
            COALESCE(CAST(TUFLOW_RESULTS AS TEXT), ''),
            COALESCE(CAST(ESTRY_RESULTS AS TEXT), ''),
            COALESCE(CAST(EVENT_DURATION AS REAL), 0),
            COALESCE(CAST(RUN_STATUS AS TEXT), ''),
            COALESCE(CAST(MB AS REAL), 0),
            COALESCE(CAST(ISIS_BUILD AS TEXT), ''),
            COALESCE(CAST(TUFLOW_BUILD AS TEXT), ''),
            COALESCE(NULLIF(CAST(EVENT_NAME AS TEXT), 'None'), ''),
            COALESCE(CAST(IEF_DIR AS TEXT), ''),
            COALESCE(CAST(TCF_DIR AS TEXT), ''),
            COALESCE(CAST(LOG_DIR AS TEXT), ''),
            COALESCE(NULLIF(CAST(RUN_OPTIONS AS TEXT), 'None'), ''),
            CAST(DAT AS TEXT),
            CAST(TCF AS TEXT),
            CAST(ECF AS TEXT),
            CAST(TGC AS TEXT),
            CAST(TBC AS TEXT),
            CAST(BC_DBASE AS TEXT)
         FROM \"{source}\"
         ORDER BY ID ASC;"
    ))?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let timestamp: String = row.get(1)?;
        let ief: String = row.get(5)?;
        let tcf: String = row.get(6)?;

        let dat = parse_file_name(row.get::<_, Option<String>>(21)?.as_deref());
        if let Some(dat) = &dat {
            gateway.insert_if_absent(
                current::DAT.name,
                &[
                    ("name", Value::from(dat.clone())),
                    ("timestamp", Value::from(timestamp.clone())),
                ],
            )?;
        }

        let text = |index: usize| -> rusqlite::Result<Value> { Ok(Value::Text(row.get(index)?)) };
        gateway.insert(
            current::RUN.name,
            &[
                ("id", Value::Integer(id)),
                ("timestamp", Value::from(timestamp.clone())),
                ("run_hash", Value::from(legacy_run_hash(id, &timestamp, &ief, &tcf))),
                ("modeller", text(2)?),
                ("setup", text(3)?),
                ("comments", text(4)?),
                ("ief", Value::from(ief.clone())),
                ("tcf", Value::from(tcf.clone())),
                ("initial_conditions", text(7)?),
                ("isis_results", text(8)?),
                ("tuflow_results", text(9)?),
                ("estry_results", text(10)?),
                ("event_duration", Value::Real(row.get(11)?)),
                ("run_status", text(12)?),
                ("mb", Value::Real(row.get(13)?)),
                ("isis_version", text(14)?),
                ("tuflow_version", text(15)?),
                ("event_name", text(16)?),
                ("ief_dir", text(17)?),
                ("tcf_dir", text(18)?),
                ("log_dir", text(19)?),
                ("run_options", text(20)?),
                ("dat", dat.map_or(Value::Null, Value::from)),
            ],
        )?;

        // Columns 22.. follow the order of `legacy::MODEL_TYPES`.
        for (offset, model_type) in legacy::MODEL_TYPES.iter().enumerate() {
            let names = parse_file_list(row.get::<_, Option<String>>(22 + offset)?.as_deref());
            for name in names {
                ensure_model_file(gateway, &name, model_type, "", &timestamp)?;
                let link = [
                    ("run_id", Value::Integer(id)),
                    ("model_file_id", Value::from(name)),
                ];
                if !gateway.exists_matching(current::RUN_MODEL_FILE.name, &link)? {
                    let [run_id, model_file_id] = link;
                    gateway.insert(
                        current::RUN_MODEL_FILE.name,
                        &[
                            run_id,
                            model_file_id,
                            ("new_file", Value::Integer(0)),
                            ("timestamp", Value::from(timestamp.clone())),
                        ],
                    )?;
                }
            }
        }
        count += 1;
    }
    Ok(count)
}

/// Creates the model file unless present; returns `true` when created.
fn ensure_model_file(
    gateway: &RecordGateway<'_>,
    name: &str,
    model_type: &str,
    comments: &str,
    timestamp: &str,
) -> DbResult<bool> {
    gateway.insert_if_absent(
        current::MODEL_FILE.name,
        &[
            ("name", Value::from(name.to_string())),
            ("model_type", Value::from(model_type.to_string())),
            ("comments", Value::from(comments.to_string())),
            ("timestamp", Value::from(timestamp.to_string())),
        ],
    )
}

fn link_sub_file(
    gateway: &RecordGateway<'_>,
    model_file: &str,
    sub_file: &str,
    is_new: bool,
    timestamp: &str,
) -> DbResult<()> {
    gateway.insert_if_absent(
        current::SUB_FILE.name,
        &[
            ("name", Value::from(sub_file.to_string())),
            ("timestamp", Value::from(timestamp.to_string())),
        ],
    )?;

    let link = [
        ("model_file_id", Value::from(model_file.to_string())),
        ("sub_file_id", Value::from(sub_file.to_string())),
    ];
    if gateway.exists_matching(current::MODEL_FILE_SUB_FILE.name, &link)? {
        return Ok(());
    }
    let [model_file_id, sub_file_id] = link;
    gateway.insert(
        current::MODEL_FILE_SUB_FILE.name,
        &[
            model_file_id,
            sub_file_id,
            ("new_file", Value::from(is_new)),
            ("timestamp", Value::from(timestamp.to_string())),
        ],
    )?;
    Ok(())
}
