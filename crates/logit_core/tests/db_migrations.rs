use logit_core::db::catalog::{current, legacy, SchemaCatalog};
use logit_core::db::migrations::{
    backup_path_for, registry, run_migration_steps, MigrateOptions, MigrationStep,
};
use logit_core::db::probe::{probe_version, VersionStatus};
use logit_core::db::{create_db, open_db, DbError, DbResult, SchemaGeneration};
use logit_core::{migrate, SqliteRunLogRepository, CURRENT_SCHEMA_VERSION};
use rusqlite::Connection;
use std::ffi::OsStr;
use std::path::Path;

#[test]
fn fresh_database_probes_same_and_migrate_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.logdb");
    drop(create_db(&path).unwrap());

    let report = probe_version(&path).unwrap();
    assert_eq!(report.db_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.status, VersionStatus::Same);

    let migration = migrate(&path, &MigrateOptions::default()).unwrap();
    assert!(migration.is_noop());
    assert_eq!(migration.backup_path, None);
    assert!(!backup_path_for(&path).exists());
}

#[test]
fn create_db_refuses_existing_files_and_foreign_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("twice.logdb");
    drop(create_db(&path).unwrap());

    assert!(matches!(create_db(&path), Err(DbError::Io { .. })));
    assert!(matches!(
        create_db(dir.path().join("models.db")),
        Err(DbError::Format { .. })
    ));
}

#[test]
fn probe_reports_missing_and_foreign_files() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.logdb");
    assert!(matches!(probe_version(&missing), Err(DbError::NotFound(_))));

    let text_file = dir.path().join("notes.logdb");
    std::fs::write(&text_file, "not a database\n".repeat(300)).unwrap();
    assert!(matches!(
        probe_version(&text_file),
        Err(DbError::Format { .. })
    ));

    let wrong_extension = dir.path().join("models.sqlite");
    std::fs::write(&wrong_extension, "").unwrap();
    assert!(matches!(
        probe_version(&wrong_extension),
        Err(DbError::Format { .. })
    ));

    let no_run_table = dir.path().join("other.logdb");
    let conn = Connection::open(&no_run_table).unwrap();
    conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY);")
        .unwrap();
    drop(conn);
    let err = probe_version(&no_run_table).unwrap_err();
    assert!(err.to_string().contains("no RUN or Run table"));
}

#[test]
fn newer_database_is_refused_and_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.logdb");
    let conn = create_db(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 99;").unwrap();
    drop(conn);
    let before = std::fs::read(&path).unwrap();

    assert_eq!(probe_version(&path).unwrap().status, VersionStatus::Higher);
    let err = migrate(&path, &MigrateOptions::default()).unwrap_err();
    match err {
        DbError::VersionUnsupported {
            db_version,
            latest_supported,
            ..
        } => {
            assert_eq!(db_version, 99);
            assert_eq!(latest_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        open_db(&path),
        Err(DbError::VersionUnsupported { db_version: 99, .. })
    ));

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(!backup_path_for(&path).exists());
}

#[test]
fn database_older_than_migratable_range_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ancient.logdb");
    write_legacy_fixture(&path, 16);

    assert_eq!(
        probe_version(&path).unwrap().status,
        VersionStatus::UnsupportedLegacy
    );
    let err = migrate(&path, &MigrateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("predates"));
    assert_eq!(schema_version(&Connection::open(&path).unwrap()), 16);
}

#[test]
fn version_twenty_database_gains_run_sub_file_associations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v20.logdb");
    write_v20_fixture(&path);

    let report = migrate(&path, &MigrateOptions::default()).unwrap();
    assert_eq!(report.from_version, 20);
    assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.applied, vec!["run_sub_file_associations"]);

    let backup = dir.path().join("v20_backup.logdb");
    assert_eq!(
        report.backup_path.as_deref().and_then(Path::file_name),
        backup.file_name()
    );
    assert_eq!(schema_version(&Connection::open(&backup).unwrap()), 20);

    let conn = Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    let expected = pairs(
        &conn,
        "SELECT DISTINCT rm.run_id, ms.sub_file_id
         FROM Run_ModelFile rm
         JOIN ModelFile_SubFile ms ON ms.model_file_id = rm.model_file_id
         ORDER BY 1, 2",
    );
    let actual = pairs(
        &conn,
        "SELECT run_id, sub_file_id FROM Run_SubFile ORDER BY 1, 2",
    );
    assert_eq!(actual, expected);
    assert_eq!(
        actual,
        vec![
            (1, "bc.csv".to_string()),
            (1, "code.mif".to_string()),
            (1, "zln.shp".to_string()),
            (2, "code.mif".to_string()),
            (2, "zln.shp".to_string()),
            (3, "zln.shp".to_string()),
        ]
    );

    let new_runs = pairs(
        &conn,
        "SELECT run_id, sub_file_id FROM Run_SubFile WHERE new_file = 1 ORDER BY 1, 2",
    );
    assert!(new_runs.iter().all(|(run_id, _)| *run_id == 1));
    assert_eq!(new_runs.len(), 3);

    let step = find_step("run_sub_file_associations");
    step.apply(&conn).unwrap();
    assert_eq!(count(&conn, "Run_SubFile"), 6);
}

#[test]
fn legacy_database_migrates_to_current_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.logdb");
    write_legacy_fixture(&path, 17);

    let mut seen = Vec::new();
    let report = logit_core::migrate_with_progress(&path, &MigrateOptions::default(), |progress| {
        seen.push((progress.completed, progress.total, progress.target_version));
    })
    .unwrap();
    assert_eq!(report.from_version, 17);
    assert_eq!(report.to_version, 21);
    assert_eq!(
        report.applied,
        vec![
            "legacy_run_event_columns",
            "legacy_bc_dbase_tables",
            "normalize_legacy_tables",
            "run_sub_file_associations",
        ]
    );
    assert_eq!(seen, vec![(1, 4, 18), (2, 4, 19), (3, 4, 20), (4, 4, 21)]);
    assert_eq!(probe_version(&path).unwrap().status, VersionStatus::Same);

    let conn = open_db(&path).unwrap();
    SqliteRunLogRepository::try_new(&conn).unwrap();
    for table in legacy::TABLES {
        assert!(!exact_table_exists(&conn, table.name), "{} kept", table.name);
        assert!(!exact_table_exists(&conn, &format!("legacy_{}", table.name)));
    }

    let (dat, event_duration, event_name, run_hash): (String, f64, String, String) = conn
        .query_row(
            "SELECT dat, event_duration, event_name, run_hash FROM Run WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(dat, "river.dat");
    assert_eq!(event_duration, 6.0);
    assert_eq!(event_name, "");
    assert_eq!(run_hash.len(), 64);

    let (amendments, comments): (String, String) = conn
        .query_row(
            "SELECT amendments, comments FROM Dat WHERE name = 'river.dat'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(amendments, "bridge added");
    assert_eq!(comments, "first");

    assert_eq!(count(&conn, "Run"), 2);
    assert_eq!(count(&conn, "ModelFile"), 3);
    assert_eq!(count(&conn, "Run_ModelFile"), 5);
    assert_eq!(count(&conn, "ModelFile_SubFile"), 4);
    assert_eq!(count(&conn, "Run_SubFile"), 7);

    let new_model_files = pairs(
        &conn,
        "SELECT run_id, model_file_id FROM Run_ModelFile WHERE new_file = 1 ORDER BY 1, 2",
    );
    assert_eq!(
        new_model_files,
        vec![
            (1, "river.tbc".to_string()),
            (1, "river.tcf".to_string()),
            (1, "river.tgc".to_string()),
        ]
    );
    let new_sub_files: Vec<String> = strings(
        &conn,
        "SELECT sub_file_id FROM ModelFile_SubFile WHERE new_file = 1 ORDER BY 1",
    );
    assert_eq!(new_sub_files, vec!["bc.csv", "zln.shp"]);
}

#[test]
fn legacy_single_name_columns_keep_separators() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("names.logdb");
    write_legacy_fixture(&path, 17);
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "INSERT INTO DAT (DATE, DAT) VALUES ('2016-02-01 09:00:00', 'reach, upper;2.dat');
         INSERT INTO TGC (DATE, TGC, FILES) VALUES ('2016-02-01 09:00:00', 'grid;v2.tgc', 'a.shp; b.shp');
         INSERT INTO RUN (ID, DATE, DAT) VALUES (3, '2016-02-01 10:00:00', 'reach, upper;2.dat');",
    )
    .unwrap();
    drop(conn);

    migrate(&path, &MigrateOptions::default()).unwrap();
    let conn = Connection::open(&path).unwrap();
    assert_eq!(
        strings(&conn, "SELECT dat FROM Run WHERE id = 3"),
        vec!["reach, upper;2.dat"]
    );
    assert_eq!(
        strings(&conn, "SELECT name FROM Dat WHERE name LIKE 'reach%'"),
        vec!["reach, upper;2.dat"]
    );
    assert_eq!(
        strings(
            &conn,
            "SELECT sub_file_id FROM ModelFile_SubFile WHERE model_file_id = 'grid;v2.tgc' ORDER BY 1"
        ),
        vec!["a.shp", "b.shp"]
    );
}

#[test]
fn migration_steps_run_twice_without_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("twice.logdb");
    write_legacy_fixture(&path, 17);
    let conn = Connection::open(&path).unwrap();

    for step in registry() {
        step.apply(&conn).unwrap();
    }
    let first = table_counts(&conn);
    for step in registry() {
        step.apply(&conn).unwrap();
    }
    assert_eq!(table_counts(&conn), first);
    assert_eq!(schema_version(&conn), 17);
}

fn broken_step(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("CREATE TABLE partial_work (id INTEGER PRIMARY KEY);")?;
    Err(DbError::InvalidData("injected failure".to_string()))
}

#[test]
fn failed_step_rolls_back_and_keeps_earlier_steps_and_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.logdb");
    write_legacy_fixture(&path, 17);

    let broken = MigrationStep::new("broken_step", 20, broken_step);
    let steps = vec![&registry()[0], &registry()[1], &broken];
    let mut conn = Connection::open(&path).unwrap();
    let mut completed = Vec::new();
    let err = run_migration_steps(&mut conn, &steps, &MigrateOptions::default(), |progress| {
        completed.push(progress.step)
    })
    .unwrap_err();

    let backup = backup_path_for(&path);
    match &err {
        DbError::StepFailure {
            step,
            target_version,
            version_reached,
            backup_path,
            source,
        } => {
            assert_eq!(*step, "broken_step");
            assert_eq!(*target_version, 20);
            assert_eq!(*version_reached, 19);
            assert_eq!(
                backup_path.as_deref().and_then(Path::file_name),
                backup.file_name()
            );
            assert!(matches!(source.as_ref(), DbError::InvalidData(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(completed, vec!["legacy_run_event_columns", "legacy_bc_dbase_tables"]);

    assert_eq!(schema_version(&conn), 17);
    assert!(exact_table_exists(&conn, "BC_DBASE"));
    assert!(has_column(&conn, "RUN", "EVENT_NAME"));
    assert!(!exact_table_exists(&conn, "partial_work"));
    drop(conn);

    let backup_conn = Connection::open(&backup).unwrap();
    assert_eq!(schema_version(&backup_conn), 17);
    assert!(!exact_table_exists(&backup_conn, "BC_DBASE"));
    drop(backup_conn);

    let retry = migrate(&path, &MigrateOptions::default()).unwrap();
    assert_eq!(retry.from_version, 17);
    assert_eq!(retry.to_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(
        retry.backup_path.as_deref().and_then(Path::file_name),
        Some(OsStr::new("broken_backup_1.logdb"))
    );

    let backup_conn = Connection::open(&backup).unwrap();
    assert_eq!(schema_version(&backup_conn), 17);
    assert!(!exact_table_exists(&backup_conn, "BC_DBASE"));
    assert!(!has_column(&backup_conn, "RUN", "EVENT_NAME"));
}

#[test]
fn backup_never_overwrites_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taken.logdb");
    write_v20_fixture(&path);
    let taken = backup_path_for(&path);
    std::fs::write(&taken, b"user notes").unwrap();

    let report = migrate(&path, &MigrateOptions::default()).unwrap();
    let backup = report.backup_path.unwrap();
    assert_eq!(backup.file_name(), Some(OsStr::new("taken_backup_1.logdb")));
    assert_eq!(std::fs::read(&taken).unwrap(), b"user notes");
    assert_eq!(schema_version(&Connection::open(&backup).unwrap()), 20);
}

#[test]
fn runner_refuses_steps_that_do_not_move_forward() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forward.logdb");
    let mut conn = create_db(&path).unwrap();

    let err = run_migration_steps(&mut conn, &[&registry()[0]], &MigrateOptions::default(), |_| {})
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidData(_)));
    assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    assert!(!backup_path_for(&path).exists());
    drop(conn);
    assert!(matches!(
        probe_version(&path).unwrap().status,
        VersionStatus::Same
    ));

    let v20 = dir.path().join("future.logdb");
    write_v20_fixture(&v20);
    let future = MigrationStep::new("future_step", CURRENT_SCHEMA_VERSION + 1, broken_step);
    let mut conn = Connection::open(&v20).unwrap();
    let err = run_migration_steps(&mut conn, &[&future], &MigrateOptions::default(), |_| {})
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidData(_)));
    assert_eq!(schema_version(&conn), 20);
    assert!(!exact_table_exists(&conn, "partial_work"));
}

#[test]
fn migrate_without_backup_writes_no_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nobackup.logdb");
    write_v20_fixture(&path);

    let options = MigrateOptions {
        create_backup: false,
    };
    let report = migrate(&path, &options).unwrap();
    assert_eq!(report.backup_path, None);
    assert!(!backup_path_for(&path).exists());
}

#[test]
fn created_schema_matches_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let conn = create_db(dir.path().join("catalog.logdb")).unwrap();
    let catalog = SchemaCatalog::for_generation(SchemaGeneration::Current);
    for table in catalog.tables() {
        assert!(exact_table_exists(&conn, table.name), "{} missing", table.name);
        for column in table.columns {
            assert!(has_column(&conn, table.name, column.name));
        }
    }
    assert_eq!(
        conn.query_row("PRAGMA foreign_keys;", [], |row| row.get::<_, i64>(0))
            .unwrap(),
        1
    );
}

fn write_legacy_fixture(path: &Path, version: u32) {
    let conn = Connection::open(path).unwrap();
    for table in legacy::TABLES.iter().filter(|table| table.exists_at(version)) {
        conn.execute_batch(&table.create_sql(version)).unwrap();
    }
    conn.execute_batch(
        "INSERT INTO DAT (DATE, DAT, AMENDMENTS, COMMENTS) VALUES
            ('2016-01-01 09:00:00', 'river.dat', 'bridge added', 'first'),
            ('2016-01-03 09:00:00', 'river.dat', '', 'second');
         INSERT INTO TGC (DATE, TGC, FILES, NEW_FILES, COMMENTS) VALUES
            ('2016-01-01 09:00:00', 'river.tgc', 'zln.shp, code.mif', 'zln.shp', 'grid');
         INSERT INTO TGC_FILES (DATE, TGC, FILES) VALUES
            ('2016-01-02 09:00:00', 'river.tgc', 'extra.shp');
         INSERT INTO TBC (DATE, TBC, FILES, NEW_FILES, COMMENTS) VALUES
            ('2016-01-01 09:00:00', 'river.tbc', 'bc.csv', 'bc.csv', '');
         INSERT INTO RUN (ID, DATE, MODELLER, IEF, TCF, TGC, TBC, DAT, EVENT_DURATION, MB, RUN_STATUS) VALUES
            (1, '2016-01-01 10:00:00', 'DR', 'a.ief', 'river.tcf', 'river.tgc', 'river.tbc', 'river.dat', '6.0', '0.5', 'Finished'),
            (2, '2016-01-02 10:00:00', 'DR', 'b.ief', 'river.tcf', 'river.tgc', 'None', 'river.dat', '3', '0.1', 'Finished');",
    )
    .unwrap();
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .unwrap();
}

fn write_v20_fixture(path: &Path) {
    let conn = Connection::open(path).unwrap();
    for statement in SchemaCatalog::for_generation(SchemaGeneration::Current).create_sql(20) {
        conn.execute_batch(&statement).unwrap();
    }
    assert!(!exact_table_exists(&conn, current::RUN_SUB_FILE.name));
    conn.execute_batch(
        "INSERT INTO Run (id, run_hash, timestamp) VALUES
            (1, 'h1', '2020-01-01 10:00:00'),
            (2, 'h2', '2020-01-02 10:00:00'),
            (3, 'h3', '2020-01-03 10:00:00');
         INSERT INTO ModelFile (name, model_type) VALUES
            ('a.tgc', 'TGC'), ('b.tgc', 'TGC'), ('a.tbc', 'TBC');
         INSERT INTO SubFile (name) VALUES ('zln.shp'), ('code.mif'), ('bc.csv');
         INSERT INTO ModelFile_SubFile (model_file_id, sub_file_id) VALUES
            ('a.tgc', 'zln.shp'), ('a.tgc', 'code.mif'), ('b.tgc', 'zln.shp'), ('a.tbc', 'bc.csv');
         INSERT INTO Run_ModelFile (run_id, model_file_id) VALUES
            (1, 'a.tgc'), (1, 'a.tbc'), (2, 'a.tgc'), (2, 'b.tgc'), (3, 'b.tgc');
         PRAGMA user_version = 20;",
    )
    .unwrap();
}

fn find_step(name: &str) -> &'static MigrationStep {
    registry()
        .iter()
        .find(|step| step.name() == name)
        .unwrap()
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn table_counts(conn: &Connection) -> Vec<(String, i64)> {
    strings(
        conn,
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .into_iter()
    .map(|table| {
        let rows = count(conn, &table);
        (table, rows)
    })
    .collect()
}

fn pairs(conn: &Connection, sql: &str) -> Vec<(i64, String)> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap();
    rows.map(Result::unwrap).collect()
}

fn strings(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([], |row| row.get(0)).unwrap();
    rows.map(Result::unwrap).collect()
}

fn exact_table_exists(conn: &Connection, table_name: &str) -> bool {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    exists == 1
}

fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
    strings(conn, &format!("SELECT name FROM pragma_table_info('{table}')"))
        .iter()
        .any(|name| name == column)
}
