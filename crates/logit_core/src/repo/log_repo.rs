//! Run log repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Record one model run with every file it referenced in a single write.
//! - Read runs back with their associations.
//! - Edit user-owned fields, delete runs, sweep orphaned files.
//!
//! # Invariants
//! - Only connections at `CURRENT_SCHEMA_VERSION` with the full current
//!   schema are accepted (`try_new`).
//! - Every multi-row write runs in one immediate transaction.
//! - Association rows are removed explicitly, independent of the
//!   connection's `foreign_keys` setting.

use crate::db::catalog::{current, SchemaCatalog};
use crate::db::migrations::ddl::{column_exists, table_exists};
use crate::db::probe::read_schema_version;
use crate::db::{DbError, DbResult, SchemaGeneration, CURRENT_SCHEMA_VERSION};
use crate::model::entry::LogEntry;
use crate::model::files::{Dat, Ied, ModelFile, ModelFileKind, RunModelFile, RunSubFile};
use crate::model::run::{Run, RunDetails, RunId};
use crate::repo::gateway::RecordGateway;
use crate::repo::new_status::{self, NewStatusSummary};
use log::{error, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Instant;

const RUN_SELECT_SQL: &str = "SELECT
    id,
    timestamp,
    dat,
    run_hash,
    setup,
    comments,
    ief,
    tcf,
    initial_conditions,
    isis_results,
    tuflow_results,
    estry_results,
    event_duration,
    run_status,
    mb,
    modeller,
    isis_version,
    tuflow_version,
    event_name,
    ief_dir,
    tcf_dir,
    log_dir,
    run_options
FROM Run";

/// Query options for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunListQuery {
    pub limit: Option<u32>,
    pub offset: u32,
}

/// What `delete_run` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunDeletion {
    pub run_id: RunId,
    /// Dat removed because no other run referenced it.
    pub dat: Option<String>,
    /// Model files removed because no other run referenced them.
    pub model_files: Vec<String>,
}

/// Repository interface for the run log.
pub trait RunLogRepository {
    fn log_entry(&self, entry: &LogEntry) -> DbResult<RunId>;
    fn get_run(&self, id: RunId) -> DbResult<Option<Run>>;
    fn list_runs(&self, query: &RunListQuery) -> DbResult<Vec<Run>>;
    fn model_files_for_run(&self, id: RunId) -> DbResult<Vec<RunModelFile>>;
    fn sub_files_for_run(&self, id: RunId) -> DbResult<Vec<RunSubFile>>;
    fn ieds_for_run(&self, id: RunId) -> DbResult<Vec<Ied>>;
    fn get_dat(&self, name: &str) -> DbResult<Option<Dat>>;
    fn update_run_comments(&self, id: RunId, comments: &str) -> DbResult<()>;
    fn update_model_file_comments(&self, name: &str, comments: &str) -> DbResult<()>;
    fn update_dat_comments(&self, name: &str, comments: &str) -> DbResult<()>;
    fn update_new_status(&self) -> DbResult<NewStatusSummary>;
    fn delete_run(&self, id: RunId, cascade: bool) -> DbResult<RunDeletion>;
    fn delete_orphan_sub_files(&self) -> DbResult<usize>;
    fn delete_orphan_ieds(&self) -> DbResult<usize>;
}

/// SQLite-backed run log repository.
pub struct SqliteRunLogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRunLogRepository<'conn> {
    /// Wraps a connection after checking it carries the current schema.
    ///
    /// # Errors
    /// - `VersionUnsupported` when the marker is not `CURRENT_SCHEMA_VERSION`.
    /// - `SchemaMismatch` when a current table or column is missing.
    pub fn try_new(conn: &'conn Connection) -> DbResult<Self> {
        ensure_run_log_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn gateway<'a>(&self, conn: &'a Connection) -> RecordGateway<'a> {
        RecordGateway::new(conn, CURRENT_SCHEMA_VERSION)
    }
}

impl RunLogRepository for SqliteRunLogRepository<'_> {
    fn log_entry(&self, entry: &LogEntry) -> DbResult<RunId> {
        let started_at = Instant::now();
        let result = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(DbError::from)
            .and_then(|tx| {
                let run_id = insert_entry(&tx, &self.gateway(&tx), entry)?;
                tx.commit()?;
                Ok(run_id)
            });

        match &result {
            Ok(run_id) => info!(
                "event=log_entry module=repo status=ok run_id={} model_files={} ieds={} duration_ms={}",
                run_id,
                entry.model_files.len(),
                entry.ieds.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=log_entry module=repo status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn get_run(&self, id: RunId) -> DbResult<Option<Run>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{RUN_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_run_row(row)?));
        }
        Ok(None)
    }

    fn list_runs(&self, query: &RunListQuery) -> DbResult<Vec<Run>> {
        let mut sql = format!("{RUN_SELECT_SQL} ORDER BY timestamp ASC, id ASC");
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(parse_run_row(row)?);
        }
        Ok(runs)
    }

    fn model_files_for_run(&self, id: RunId) -> DbResult<Vec<RunModelFile>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT m.name, m.model_type, m.comments, m.timestamp, rm.new_file
             FROM Run_ModelFile rm
             JOIN ModelFile m ON m.name = rm.model_file_id
             WHERE rm.run_id = ?1
             ORDER BY rm.id ASC;",
        )?;
        let mut rows = stmt.query([id])?;
        let mut model_files = Vec::new();
        while let Some(row) = rows.next()? {
            let type_text: String = row.get(1)?;
            let kind = ModelFileKind::parse(&type_text).ok_or_else(|| {
                DbError::InvalidData(format!(
                    "invalid model type `{type_text}` in ModelFile.model_type"
                ))
            })?;
            model_files.push(RunModelFile {
                model_file: ModelFile {
                    name: row.get(0)?,
                    kind,
                    comments: row.get(2)?,
                    timestamp: row.get(3)?,
                },
                new_file: parse_flag(row.get(4)?, "Run_ModelFile.new_file")?,
            });
        }
        Ok(model_files)
    }

    fn sub_files_for_run(&self, id: RunId) -> DbResult<Vec<RunSubFile>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT sub_file_id, new_file
             FROM Run_SubFile
             WHERE run_id = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([id])?;
        let mut sub_files = Vec::new();
        while let Some(row) = rows.next()? {
            sub_files.push(RunSubFile {
                name: row.get(0)?,
                new_file: parse_flag(row.get(1)?, "Run_SubFile.new_file")?,
            });
        }
        Ok(sub_files)
    }

    fn ieds_for_run(&self, id: RunId) -> DbResult<Vec<Ied>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT i.name, i.ref, i.amendments, i.comments, i.timestamp
             FROM Run_Ied ri
             JOIN Ied i ON i.name = ri.ied_id
             WHERE ri.run_id = ?1
             ORDER BY ri.id ASC;",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok(Ied {
                name: row.get(0)?,
                reference: row.get(1)?,
                amendments: row.get(2)?,
                comments: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_dat(&self, name: &str) -> DbResult<Option<Dat>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, amendments, comments, timestamp FROM Dat WHERE name = ?1;",
        )?;
        let mut rows = stmt.query([name])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(Dat {
                name: row.get(0)?,
                amendments: row.get(1)?,
                comments: row.get(2)?,
                timestamp: row.get(3)?,
            }));
        }
        Ok(None)
    }

    fn update_run_comments(&self, id: RunId, comments: &str) -> DbResult<()> {
        self.gateway(self.conn).update(
            current::RUN.name,
            &[("comments", Value::from(comments.to_string()))],
            id,
        )
    }

    fn update_model_file_comments(&self, name: &str, comments: &str) -> DbResult<()> {
        self.gateway(self.conn).update(
            current::MODEL_FILE.name,
            &[("comments", Value::from(comments.to_string()))],
            name.to_string(),
        )
    }

    fn update_dat_comments(&self, name: &str, comments: &str) -> DbResult<()> {
        self.gateway(self.conn).update(
            current::DAT.name,
            &[("comments", Value::from(comments.to_string()))],
            name.to_string(),
        )
    }

    fn update_new_status(&self) -> DbResult<NewStatusSummary> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let summary = new_status::refresh_all(&tx)?;
        tx.commit()?;
        info!(
            "event=new_status_update module=repo status=ok changed={}",
            summary.total()
        );
        Ok(summary)
    }

    fn delete_run(&self, id: RunId, cascade: bool) -> DbResult<RunDeletion> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let gateway = self.gateway(&tx);

        let dat: Option<String> = tx
            .query_row("SELECT dat FROM Run WHERE id = ?1;", [id], |row| row.get(0))
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => DbError::RowNotFound {
                    table: current::RUN.name.to_string(),
                    key: id.to_string(),
                },
                other => DbError::from(other),
            })?;

        let mut deletion = RunDeletion {
            run_id: id,
            ..RunDeletion::default()
        };
        if cascade {
            deletion.model_files = exclusive_model_files(&tx, id)?;
            if let Some(dat) = dat {
                let shared: i64 = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM Run WHERE dat = ?1 AND id != ?2);",
                    params![dat, id],
                    |row| row.get(0),
                )?;
                if shared == 0 {
                    deletion.dat = Some(dat);
                }
            }
        }

        for table in [&current::RUN_MODEL_FILE, &current::RUN_SUB_FILE, &current::RUN_IED] {
            gateway.delete_where(table.name, "run_id", id)?;
        }
        gateway.delete(current::RUN.name, id)?;

        for name in &deletion.model_files {
            gateway.delete_where(current::MODEL_FILE_SUB_FILE.name, "model_file_id", name)?;
            gateway.delete(current::MODEL_FILE.name, name.clone())?;
        }
        if let Some(dat) = &deletion.dat {
            gateway.delete(current::DAT.name, dat.clone())?;
        }
        tx.commit()?;

        info!(
            "event=run_delete module=repo status=ok run_id={} cascade={} model_files={} dat_removed={}",
            id,
            cascade,
            deletion.model_files.len(),
            deletion.dat.is_some()
        );
        Ok(deletion)
    }

    fn delete_orphan_sub_files(&self) -> DbResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM SubFile
             WHERE name NOT IN (SELECT sub_file_id FROM ModelFile_SubFile)
               AND name NOT IN (SELECT sub_file_id FROM Run_SubFile);",
            [],
        )?;
        Ok(removed)
    }

    fn delete_orphan_ieds(&self) -> DbResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM Ied WHERE name NOT IN (SELECT ied_id FROM Run_Ied);",
            [],
        )?;
        Ok(removed)
    }
}

fn insert_entry(
    conn: &Connection,
    gateway: &RecordGateway<'_>,
    entry: &LogEntry,
) -> DbResult<RunId> {
    let timestamp = match &entry.timestamp {
        Some(timestamp) => timestamp.clone(),
        None => conn.query_row("SELECT CURRENT_TIMESTAMP;", [], |row| row.get(0))?,
    };

    if let Some(dat) = &entry.dat {
        gateway.insert_if_absent(
            current::DAT.name,
            &[
                ("name", Value::from(dat.clone())),
                ("timestamp", Value::from(timestamp.clone())),
            ],
        )?;
    }

    let run_id = gateway.insert(
        current::RUN.name,
        &run_fields(&timestamp, entry.dat.as_deref(), &entry.run),
    )?;

    for model_file in &entry.model_files {
        let created = gateway.insert_if_absent(
            current::MODEL_FILE.name,
            &[
                ("name", Value::from(model_file.name.clone())),
                ("model_type", Value::from(model_file.kind.as_db_str().to_string())),
                ("timestamp", Value::from(timestamp.clone())),
            ],
        )?;
        gateway.insert(
            current::RUN_MODEL_FILE.name,
            &[
                ("run_id", Value::Integer(run_id)),
                ("model_file_id", Value::from(model_file.name.clone())),
                ("new_file", Value::from(created)),
                ("timestamp", Value::from(timestamp.clone())),
            ],
        )?;

        for sub_file in &model_file.sub_files {
            let sub_created = gateway.insert_if_absent(
                current::SUB_FILE.name,
                &[
                    ("name", Value::from(sub_file.clone())),
                    ("timestamp", Value::from(timestamp.clone())),
                ],
            )?;
            link_once(
                gateway,
                current::MODEL_FILE_SUB_FILE.name,
                [
                    ("model_file_id", Value::from(model_file.name.clone())),
                    ("sub_file_id", Value::from(sub_file.clone())),
                ],
                sub_created,
                &timestamp,
            )?;
            link_once(
                gateway,
                current::RUN_SUB_FILE.name,
                [
                    ("run_id", Value::Integer(run_id)),
                    ("sub_file_id", Value::from(sub_file.clone())),
                ],
                sub_created,
                &timestamp,
            )?;
        }
    }

    for ied in &entry.ieds {
        let created = gateway.insert_if_absent(
            current::IED.name,
            &[
                ("name", Value::from(ied.clone())),
                ("timestamp", Value::from(timestamp.clone())),
            ],
        )?;
        link_once(
            gateway,
            current::RUN_IED.name,
            [
                ("run_id", Value::Integer(run_id)),
                ("ied_id", Value::from(ied.clone())),
            ],
            created,
            &timestamp,
        )?;
    }

    Ok(run_id)
}

/// Inserts an association row unless the same pair is already linked.
fn link_once(
    gateway: &RecordGateway<'_>,
    table: &str,
    link: [(&str, Value); 2],
    new_file: bool,
    timestamp: &str,
) -> DbResult<()> {
    if gateway.exists_matching(table, &link)? {
        return Ok(());
    }
    let [left, right] = link;
    gateway.insert(
        table,
        &[
            left,
            right,
            ("new_file", Value::from(new_file)),
            ("timestamp", Value::from(timestamp.to_string())),
        ],
    )?;
    Ok(())
}

fn run_fields<'a>(timestamp: &str, dat: Option<&str>, run: &RunDetails) -> Vec<(&'a str, Value)> {
    let text = |value: &str| Value::from(value.to_string());
    vec![
        ("timestamp", text(timestamp)),
        ("dat", dat.map_or(Value::Null, text)),
        ("run_hash", text(&run.run_hash)),
        ("setup", text(&run.setup)),
        ("comments", text(&run.comments)),
        ("ief", text(&run.ief)),
        ("tcf", text(&run.tcf)),
        ("initial_conditions", text(&run.initial_conditions)),
        ("isis_results", text(&run.isis_results)),
        ("tuflow_results", text(&run.tuflow_results)),
        ("estry_results", text(&run.estry_results)),
        ("event_duration", Value::Real(run.event_duration)),
        ("run_status", text(&run.run_status)),
        ("mb", Value::Real(run.mb)),
        ("modeller", text(&run.modeller)),
        ("isis_version", text(&run.isis_version)),
        ("tuflow_version", text(&run.tuflow_version)),
        ("event_name", text(&run.event_name)),
        ("ief_dir", text(&run.ief_dir)),
        ("tcf_dir", text(&run.tcf_dir)),
        ("log_dir", text(&run.log_dir)),
        ("run_options", text(&run.run_options)),
    ]
}

/// Model files linked to `id` and to no other run.
fn exclusive_model_files(conn: &Connection, id: RunId) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT rm.model_file_id
         FROM Run_ModelFile rm
         WHERE rm.run_id = ?1
           AND NOT EXISTS (
               SELECT 1
               FROM Run_ModelFile other
               WHERE other.model_file_id = rm.model_file_id AND other.run_id != ?1
           )
         ORDER BY rm.model_file_id ASC;",
    )?;
    let rows = stmt.query_map([id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn parse_run_row(row: &Row<'_>) -> DbResult<Run> {
    Ok(Run {
        id: row.get("id")?,
        timestamp: row.get("timestamp")?,
        dat: row.get("dat")?,
        details: RunDetails {
            run_hash: row.get("run_hash")?,
            setup: row.get("setup")?,
            comments: row.get("comments")?,
            ief: row.get("ief")?,
            tcf: row.get("tcf")?,
            initial_conditions: row.get("initial_conditions")?,
            isis_results: row.get("isis_results")?,
            tuflow_results: row.get("tuflow_results")?,
            estry_results: row.get("estry_results")?,
            event_duration: row.get("event_duration")?,
            run_status: row.get("run_status")?,
            mb: row.get("mb")?,
            modeller: row.get("modeller")?,
            isis_version: row.get("isis_version")?,
            tuflow_version: row.get("tuflow_version")?,
            event_name: row.get("event_name")?,
            ief_dir: row.get("ief_dir")?,
            tcf_dir: row.get("tcf_dir")?,
            log_dir: row.get("log_dir")?,
            run_options: row.get("run_options")?,
        },
    })
}

fn parse_flag(value: i64, column: &str) -> DbResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DbError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

fn ensure_run_log_connection_ready(conn: &Connection) -> DbResult<()> {
    let actual_version = read_schema_version(conn)?;
    if actual_version != CURRENT_SCHEMA_VERSION {
        return Err(DbError::unsupported_version(actual_version));
    }

    let catalog = SchemaCatalog::for_generation(SchemaGeneration::Current);
    for table in catalog.tables() {
        if !table_exists(conn, table.name)? {
            return Err(DbError::schema_mismatch(
                catalog.generation(),
                table.name,
                None,
            ));
        }
        for column in table.columns_at(CURRENT_SCHEMA_VERSION) {
            if !column_exists(conn, table.name, column.name)? {
                return Err(DbError::schema_mismatch(
                    catalog.generation(),
                    table.name,
                    Some(column.name),
                ));
            }
        }
    }
    Ok(())
}
