use fireball_core::db::{DbError, ProjectDb, ProjectLayout, CURRENT_SCHEMA_VERSION};
use rusqlite::{params, Connection};
use tempfile::tempdir;

#[test]
fn project_db_open_errors_on_unsupported_schema_version() {
    let tmp = tempdir().expect("temp dir");
    let layout = ProjectLayout::new(tmp.path());
    std::fs::create_dir_all(&layout.meta_dir).expect("create .fireball dir");

    {
        let conn = Connection::open(&layout.db_path).expect("open raw sqlite db");
        conn.pragma_update(None, "user_version", 99_i32).expect("set user_version pragma");
    }

    match ProjectDb::open(&layout.db_path) {
        Err(DbError::UnsupportedSchemaVersion { found, min_supported, max_supported }) => {
            assert_eq!(found, 99);
            assert_eq!(min_supported, 0);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        Err(err) => panic!("expected UnsupportedSchemaVersion error, got: {err}"),
        Ok(_) => panic!("expected UnsupportedSchemaVersion error, got Ok(_)"),
    }
}

#[test]
fn overlapping_stored_units_are_reported_as_corrupt() {
    let tmp = tempdir().expect("temp dir");
    let db_path = tmp.path().join("project.db");
    let db = ProjectDb::open(&db_path).expect("open db");

    let conn = db.connection();
    conn.execute(
        "INSERT INTO known_sections (binary, start_addr, end_addr, analyzed) VALUES (?1, ?2, ?3, 1)",
        params!["bin", 0x1000_i64, 0x1010_i64],
    )
    .expect("insert section");
    for (start, end) in [(0x1000_i64, 0x1004_i64), (0x1002, 0x1006)] {
        conn.execute(
            "INSERT INTO section_units (binary, start_addr, end_addr) VALUES (?1, ?2, ?3)",
            params!["bin", start, end],
        )
        .expect("insert unit");
    }

    match db.load_address_space("bin") {
        Err(DbError::CorruptIndex { binary, .. }) => assert_eq!(binary, "bin"),
        other => panic!("expected CorruptIndex, got {other:?}"),
    }
}

#[test]
fn unknown_run_status_is_rejected() {
    let tmp = tempdir().expect("temp dir");
    let db = ProjectDb::open(&tmp.path().join("project.db")).expect("open db");
    db.connection()
        .execute(
            "INSERT INTO decompile_runs (binary, entries, status, started_at) VALUES ('b', '[]', 'exploded', 't')",
            [],
        )
        .expect("insert raw run");

    assert!(matches!(db.list_runs(None), Err(DbError::InvalidValue(_))));
}

#[test]
fn version_three_databases_migrate_to_the_current_schema() {
    let tmp = tempdir().expect("temp dir");
    let db_path = tmp.path().join("project.db");
    {
        let conn = Connection::open(&db_path).expect("open raw sqlite db");
        conn.execute_batch(
            r#"
            CREATE TABLE binaries (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE, path TEXT NOT NULL, arch TEXT, hash TEXT);
            CREATE TABLE known_sections (binary TEXT NOT NULL, start_addr INTEGER NOT NULL, end_addr INTEGER, analyzed INTEGER NOT NULL, PRIMARY KEY (binary, start_addr));
            CREATE TABLE section_units (binary TEXT NOT NULL, start_addr INTEGER NOT NULL, end_addr INTEGER NOT NULL, PRIMARY KEY (binary, start_addr));
            CREATE TABLE decompile_runs (id INTEGER PRIMARY KEY AUTOINCREMENT, binary TEXT NOT NULL, entries TEXT NOT NULL, status TEXT NOT NULL, started_at TEXT NOT NULL, finished_at TEXT, diagnostics TEXT);
            CREATE TABLE run_assembly (run_id INTEGER NOT NULL, idx INTEGER NOT NULL, parent_start INTEGER NOT NULL, data TEXT NOT NULL, PRIMARY KEY (run_id, idx));
            CREATE TABLE run_ir (run_id INTEGER NOT NULL, seq INTEGER NOT NULL, parent_idx INTEGER NOT NULL, data TEXT NOT NULL, PRIMARY KEY (run_id, seq));
            CREATE TABLE run_output (run_id INTEGER PRIMARY KEY, decompiled TEXT NOT NULL);
            INSERT INTO decompile_runs (binary, entries, status, started_at) VALUES ('old', '[4096]', 'succeeded', 't0');
            INSERT INTO known_sections (binary, start_addr, end_addr, analyzed) VALUES ('old', 4096, 4098, 1);
            INSERT INTO section_units (binary, start_addr, end_addr) VALUES ('old', 4096, 4098);
            PRAGMA user_version = 3;
            "#,
        )
        .expect("create v3 schema");
    }

    let db = ProjectDb::open(&db_path).expect("migrate");
    let version: i32 =
        db.connection().query_row("PRAGMA user_version;", [], |row| row.get(0)).expect("version");
    assert_eq!(version, CURRENT_SCHEMA_VERSION);

    let runs = db.list_runs(Some("old")).expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].entries, vec![0x1000]);
    assert_eq!(runs[0].error, None);

    // Units from before payloads were stored load without a cached decode.
    let index = db.load_address_space("old").expect("load legacy units");
    assert_eq!(index.units(), vec![(0x1000, 0x1002)]);
    assert_eq!(index.cached_unit(0x1000), None);
}
