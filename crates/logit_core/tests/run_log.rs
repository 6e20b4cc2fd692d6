use logit_core::db::catalog::SchemaCatalog;
use logit_core::db::{open_db_in_memory, DbError, SchemaGeneration};
use logit_core::{
    LogEntry, LogEntryError, LogService, LogServiceError, ModelFileEntry, ModelFileKind,
    RunDetails, RunListQuery, RunLogRepository, SqliteRunLogRepository,
};
use rusqlite::Connection;

fn entry(hash: &str, timestamp: &str, dat: Option<&str>, model_files: Vec<ModelFileEntry>) -> LogEntry {
    LogEntry {
        timestamp: Some(timestamp.to_string()),
        run: RunDetails {
            run_hash: hash.to_string(),
            ief: format!("{hash}.ief"),
            tcf: "river.tcf".to_string(),
            modeller: "DR".to_string(),
            event_duration: 6.0,
            ..RunDetails::default()
        },
        dat: dat.map(str::to_string),
        model_files,
        ieds: Vec::new(),
    }
}

fn tgc(name: &str, sub_files: &[&str]) -> ModelFileEntry {
    ModelFileEntry::new(name, ModelFileKind::Tgc).with_sub_files(sub_files.iter().copied())
}

fn tbc(name: &str, sub_files: &[&str]) -> ModelFileEntry {
    ModelFileEntry::new(name, ModelFileKind::Tbc).with_sub_files(sub_files.iter().copied())
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn log_entry_records_run_and_every_association() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRunLogRepository::try_new(&conn).unwrap();

    let mut first = entry(
        "h1",
        "2024-03-01 09:00:00",
        Some("river.dat"),
        vec![tgc("a.tgc", &["zln.shp", "code.mif"]), tbc("a.tbc", &["bc.csv"])],
    );
    first.ieds = vec!["storm.ied".to_string()];
    let run_id = repo.log_entry(&first).unwrap();

    let run = repo.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.timestamp, "2024-03-01 09:00:00");
    assert_eq!(run.dat.as_deref(), Some("river.dat"));
    assert_eq!(run.details, first.run);

    let model_files = repo.model_files_for_run(run_id).unwrap();
    assert_eq!(model_files.len(), 2);
    assert!(model_files.iter().all(|file| file.new_file));
    assert_eq!(model_files[1].model_file.kind, ModelFileKind::Tbc);

    let sub_files = repo.sub_files_for_run(run_id).unwrap();
    let names: Vec<_> = sub_files.iter().map(|file| file.name.as_str()).collect();
    assert_eq!(names, vec!["zln.shp", "code.mif", "bc.csv"]);
    assert!(sub_files.iter().all(|file| file.new_file));

    let ieds = repo.ieds_for_run(run_id).unwrap();
    assert_eq!(ieds.len(), 1);
    assert_eq!(ieds[0].name, "storm.ied");

    let second = entry(
        "h2",
        "2024-03-02 09:00:00",
        Some("river.dat"),
        vec![tgc("a.tgc", &["zln.shp"])],
    );
    let second_id = repo.log_entry(&second).unwrap();
    let shared = repo.model_files_for_run(second_id).unwrap();
    assert!(!shared[0].new_file);
    assert!(!repo.sub_files_for_run(second_id).unwrap()[0].new_file);

    assert_eq!(count(&conn, "ModelFile"), 2);
    assert_eq!(count(&conn, "ModelFile_SubFile"), 3);
    assert_eq!(count(&conn, "Dat"), 1);
    assert_eq!(repo.list_runs(&RunListQuery::default()).unwrap().len(), 2);
}

#[test]
fn duplicate_run_hash_writes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRunLogRepository::try_new(&conn).unwrap();
    repo.log_entry(&entry("abc", "2024-03-01 09:00:00", None, vec![]))
        .unwrap();

    let retry = entry(
        "abc",
        "2024-03-02 09:00:00",
        Some("new.dat"),
        vec![tgc("b.tgc", &["new.shp"])],
    );
    let err = repo.log_entry(&retry).unwrap_err();
    assert!(matches!(err, DbError::Duplicate { ref table, .. } if table == "Run"));

    assert_eq!(count(&conn, "Run"), 1);
    assert_eq!(count(&conn, "Dat"), 0);
    assert_eq!(count(&conn, "ModelFile"), 0);
    assert_eq!(count(&conn, "SubFile"), 0);
}

#[test]
fn cascade_delete_keeps_shared_files_and_orphans_are_swept() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRunLogRepository::try_new(&conn).unwrap();

    let mut first = entry(
        "h1",
        "2024-03-01 09:00:00",
        Some("river.dat"),
        vec![tgc("a.tgc", &["zln.shp", "code.mif"]), tbc("a.tbc", &["bc.csv"])],
    );
    first.ieds = vec!["storm.ied".to_string()];
    let first_id = repo.log_entry(&first).unwrap();
    let second_id = repo
        .log_entry(&entry(
            "h2",
            "2024-03-02 09:00:00",
            Some("other.dat"),
            vec![tgc("a.tgc", &["zln.shp"])],
        ))
        .unwrap();

    let deletion = repo.delete_run(first_id, true).unwrap();
    assert_eq!(deletion.run_id, first_id);
    assert_eq!(deletion.dat.as_deref(), Some("river.dat"));
    assert_eq!(deletion.model_files, vec!["a.tbc".to_string()]);

    assert!(repo.get_run(first_id).unwrap().is_none());
    assert_eq!(repo.model_files_for_run(second_id).unwrap().len(), 1);
    assert!(repo.get_dat("river.dat").unwrap().is_none());
    assert!(repo.get_dat("other.dat").unwrap().is_some());
    assert_eq!(count(&conn, "ModelFile"), 1);
    assert_eq!(count(&conn, "Run_SubFile"), 1);

    // code.mif is still linked to a.tgc; bc.csv lost its only model file.
    assert_eq!(repo.delete_orphan_sub_files().unwrap(), 1);
    assert_eq!(count(&conn, "SubFile"), 2);
    assert_eq!(repo.delete_orphan_ieds().unwrap(), 1);
    assert_eq!(repo.delete_orphan_sub_files().unwrap(), 0);

    assert!(matches!(
        repo.delete_run(first_id, true),
        Err(DbError::RowNotFound { .. })
    ));
}

#[test]
fn plain_delete_keeps_files() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRunLogRepository::try_new(&conn).unwrap();
    let run_id = repo
        .log_entry(&entry(
            "h1",
            "2024-03-01 09:00:00",
            Some("river.dat"),
            vec![tgc("a.tgc", &["zln.shp"])],
        ))
        .unwrap();

    let deletion = repo.delete_run(run_id, false).unwrap();
    assert_eq!(deletion.dat, None);
    assert!(deletion.model_files.is_empty());
    assert_eq!(count(&conn, "ModelFile"), 1);
    assert_eq!(count(&conn, "Dat"), 1);
    assert_eq!(count(&conn, "Run_ModelFile"), 0);
}

#[test]
fn new_status_follows_timestamps_not_insert_order() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRunLogRepository::try_new(&conn).unwrap();

    let later = repo
        .log_entry(&entry(
            "late",
            "2024-05-01 09:00:00",
            None,
            vec![tgc("a.tgc", &["zln.shp"])],
        ))
        .unwrap();
    let earlier = repo
        .log_entry(&entry(
            "early",
            "2024-04-01 09:00:00",
            None,
            vec![tgc("a.tgc", &["zln.shp"])],
        ))
        .unwrap();
    assert!(repo.model_files_for_run(later).unwrap()[0].new_file);

    let summary = repo.update_new_status().unwrap();
    assert_eq!(summary.run_model_file, 2);
    assert_eq!(summary.run_sub_file, 2);
    assert!(!repo.model_files_for_run(later).unwrap()[0].new_file);
    assert!(repo.model_files_for_run(earlier).unwrap()[0].new_file);
    assert!(repo.sub_files_for_run(earlier).unwrap()[0].new_file);

    assert_eq!(repo.update_new_status().unwrap().total(), 0);
}

#[test]
fn comment_updates_reach_user_editable_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRunLogRepository::try_new(&conn).unwrap();
    let run_id = repo
        .log_entry(&entry(
            "h1",
            "2024-03-01 09:00:00",
            Some("river.dat"),
            vec![tgc("a.tgc", &[])],
        ))
        .unwrap();

    repo.update_run_comments(run_id, "baseline").unwrap();
    repo.update_model_file_comments("a.tgc", "new roughness").unwrap();
    repo.update_dat_comments("river.dat", "survey 2023").unwrap();

    assert_eq!(repo.get_run(run_id).unwrap().unwrap().details.comments, "baseline");
    assert_eq!(
        repo.model_files_for_run(run_id).unwrap()[0].model_file.comments,
        "new roughness"
    );
    assert_eq!(repo.get_dat("river.dat").unwrap().unwrap().comments, "survey 2023");
    assert!(matches!(
        repo.update_model_file_comments("missing.tgc", "x"),
        Err(DbError::RowNotFound { .. })
    ));
}

#[test]
fn try_new_rejects_outdated_connections() {
    let conn = Connection::open_in_memory().unwrap();
    for statement in SchemaCatalog::for_generation(SchemaGeneration::Current).create_sql(20) {
        conn.execute_batch(&statement).unwrap();
    }
    conn.execute_batch("PRAGMA user_version = 20;").unwrap();
    assert!(matches!(
        SqliteRunLogRepository::try_new(&conn),
        Err(DbError::VersionUnsupported { db_version: 20, .. })
    ));

    conn.execute_batch("PRAGMA user_version = 21;").unwrap();
    match SqliteRunLogRepository::try_new(&conn) {
        Err(DbError::SchemaMismatch { table, .. }) => assert_eq!(table, "Run_SubFile"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("missing Run_SubFile must be rejected"),
    }
}

#[test]
fn service_derives_hash_and_validates_entries() {
    let conn = open_db_in_memory().unwrap();
    let service = LogService::new(SqliteRunLogRepository::try_new(&conn).unwrap());

    let run = service
        .log_run(entry(
            "",
            "2024-03-01 09:00:00",
            Some(" river.dat "),
            vec![tgc(" a.tgc ", &["zln.shp", "zln.shp"])],
        ))
        .unwrap();
    assert_eq!(run.details.run_hash.len(), 64);
    assert_eq!(run.dat.as_deref(), Some("river.dat"));
    assert_eq!(
        service.repository().sub_files_for_run(run.id).unwrap().len(),
        1
    );

    let err = service
        .log_run(entry(
            "h2",
            "2024-03-02 09:00:00",
            None,
            vec![tgc("  ", &[])],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        LogServiceError::Validation(LogEntryError::BlankName { .. })
    ));

    assert!(matches!(
        service.get_run(999),
        Err(LogServiceError::RunNotFound(999))
    ));
    assert!(matches!(
        service.delete_run(999, true),
        Err(LogServiceError::RunNotFound(999))
    ));

    service.delete_run(run.id, true).unwrap();
    let sweep = service.sweep_orphans().unwrap();
    assert_eq!(sweep.sub_files, 1);
    assert_eq!(sweep.ieds, 0);
}

#[test]
fn log_entry_serializes_with_persisted_spellings() {
    let value = serde_json::to_value(entry(
        "h1",
        "2024-03-01 09:00:00",
        None,
        vec![tgc("a.tgc", &["zln.shp"])],
    ))
    .unwrap();
    assert_eq!(value["model_files"][0]["kind"], "TGC");
    assert_eq!(value["run"]["run_hash"], "h1");
}
