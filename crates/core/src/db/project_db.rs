use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::analysis::{AddressSpaceIndex, CachedUnit, Diagnostic, UnitRecord};
use crate::db::{BinaryRecord, DecompileRunRecord, RunStatus};
use crate::error::OverlapError;
use crate::model::{Assembly, DecompileResult, Ir, KnownSection};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 5;

/// Error type for project database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    /// A JSON column could not be encoded or decoded.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted sections/units for a binary do not form a valid index.
    #[error("stored address space for `{binary}` is inconsistent: {source}")]
    CorruptIndex {
        binary: String,
        #[source]
        source: OverlapError,
    },

    /// A stored value could not be interpreted.
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed project database.
///
/// This is a thin wrapper around `rusqlite::Connection` that is responsible for:
/// - Opening/creating the DB file.
/// - Applying schema migrations.
/// - Persisting binaries, per-binary address-space indexes, and decompile runs.
#[derive(Debug)]
pub struct ProjectDb {
    conn: Connection,
}

impl ProjectDb {
    /// Open (or create) a project database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a binary record and return its row id.
    pub fn insert_binary(&self, record: &BinaryRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO binaries (name, path, arch, hash)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![record.name, record.path, record.arch, record.hash],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all binaries (ordered by id).
    pub fn list_binaries(&self) -> DbResult<Vec<BinaryRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, path, arch, hash
            FROM binaries
            ORDER BY id
            "#,
        )?;
        let binaries = stmt.query_map([], map_binary)?.collect::<Result<Vec<_>, _>>()?;
        Ok(binaries)
    }

    pub fn find_binary(&self, name: &str) -> DbResult<Option<BinaryRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT name, path, arch, hash
                FROM binaries
                WHERE name = ?1
                "#,
                params![name],
                map_binary,
            )
            .optional()?;
        Ok(record)
    }

    /// Replace the stored address-space index of `binary` with `index`.
    pub fn save_address_space(&self, binary: &str, index: &AddressSpaceIndex) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM known_sections WHERE binary = ?1", params![binary])?;
        tx.execute("DELETE FROM section_units WHERE binary = ?1", params![binary])?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO known_sections (binary, start_addr, end_addr, analyzed)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for section in index.sections() {
                stmt.execute(params![
                    binary,
                    section.start_address as i64,
                    section.end_address.map(|e| e as i64),
                    if section.analyzed { 1 } else { 0 }
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO section_units (binary, start_addr, end_addr, data, successors)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for unit in index.unit_records() {
                let (data, successors) = match &unit.cached {
                    Some(cached) => {
                        (Some(cached.data.as_str()), Some(serde_json::to_string(&cached.successors)?))
                    }
                    None => (None, None),
                };
                stmt.execute(params![
                    binary,
                    unit.start as i64,
                    unit.end as i64,
                    data,
                    successors
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Sections stored for `binary`, ordered by start address.
    pub fn list_sections(&self, binary: &str) -> DbResult<Vec<KnownSection>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT start_addr, end_addr, analyzed
            FROM known_sections
            WHERE binary = ?1
            ORDER BY start_addr
            "#,
        )?;
        let rows = stmt.query_map(params![binary], |row| {
            let start: i64 = row.get(0)?;
            let end: Option<i64> = row.get(1)?;
            let analyzed: i64 = row.get(2)?;
            Ok(KnownSection {
                start_address: start as u64,
                end_address: end.map(|e| e as u64),
                analyzed: analyzed != 0,
            })
        })?;

        let mut sections = rows.collect::<Result<Vec<_>, _>>()?;
        // Addresses are stored as signed integers; restore unsigned order.
        sections.sort_by_key(|s| s.start_address);
        Ok(sections)
    }

    /// Rebuild the address-space index of `binary`; empty if nothing was saved.
    ///
    /// Units saved before payloads were stored come back without a cached
    /// decode and are decoded again when a request reaches them.
    pub fn load_address_space(&self, binary: &str) -> DbResult<AddressSpaceIndex> {
        let sections = self.list_sections(binary)?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT start_addr, end_addr, data, successors
            FROM section_units
            WHERE binary = ?1
            ORDER BY start_addr
            "#,
        )?;
        let rows = stmt.query_map(params![binary], |row| {
            let start: i64 = row.get(0)?;
            let end: i64 = row.get(1)?;
            let data: Option<String> = row.get(2)?;
            let successors: Option<String> = row.get(3)?;
            Ok((start as u64, end as u64, data, successors))
        })?;
        let raw = rows.collect::<Result<Vec<_>, _>>()?;

        let mut units = Vec::with_capacity(raw.len());
        for (start, end, data, successors) in raw {
            let cached = match data {
                Some(data) => {
                    let successors = match successors.as_deref() {
                        Some(json) if !json.is_empty() => serde_json::from_str(json)?,
                        _ => Vec::new(),
                    };
                    Some(CachedUnit { data, successors })
                }
                None => None,
            };
            units.push(UnitRecord { start, end, cached });
        }

        AddressSpaceIndex::from_parts(sections, units)
            .map_err(|source| DbError::CorruptIndex { binary: binary.to_string(), source })
    }

    /// Insert a decompile run record and return its row id.
    pub fn insert_decompile_run(&self, record: &DecompileRunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO decompile_runs (binary, entries, status, started_at, finished_at, diagnostics, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.binary,
                serde_json::to_string(&record.entries)?,
                record.status.as_str(),
                record.started_at,
                record.finished_at,
                serde_json::to_string(&record.diagnostics)?,
                record.error
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record the final status of a run.
    ///
    /// Returns the number of rows affected.
    pub fn finish_decompile_run(
        &self,
        run_id: i64,
        status: RunStatus,
        finished_at: &str,
        diagnostics: &[Diagnostic],
        error: Option<&str>,
    ) -> DbResult<usize> {
        let affected = self.conn.execute(
            r#"
            UPDATE decompile_runs
            SET status = ?1, finished_at = ?2, diagnostics = ?3, error = ?4
            WHERE id = ?5
            "#,
            params![status.as_str(), finished_at, serde_json::to_string(diagnostics)?, error, run_id],
        )?;
        Ok(affected)
    }

    /// Persist the assembly, IR, and pseudocode of a run.
    pub fn insert_decompile_result(&self, run_id: i64, result: &DecompileResult) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO run_assembly (run_id, idx, parent_start, data)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for node in &result.assembly {
                stmt.execute(params![
                    run_id,
                    node.index as i64,
                    node.parents_start_address as i64,
                    node.data
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO run_ir (run_id, seq, parent_idx, data)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for (seq, node) in result.ir.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    node.parents_assembly_index as i64,
                    node.data
                ])?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO run_output (run_id, decompiled) VALUES (?1, ?2)",
            params![run_id, result.decompiled],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// List decompile runs, optionally filtered by binary name.
    pub fn list_runs(&self, binary: Option<&str>) -> DbResult<Vec<DecompileRunRecord>> {
        let mut stmt = if binary.is_some() {
            self.conn.prepare(
                r#"
                SELECT id, binary, entries, status, started_at, finished_at, diagnostics, error
                FROM decompile_runs
                WHERE binary = ?1
                ORDER BY id
                "#,
            )?
        } else {
            self.conn.prepare(
                r#"
                SELECT id, binary, entries, status, started_at, finished_at, diagnostics, error
                FROM decompile_runs
                ORDER BY id
                "#,
            )?
        };

        let rows = if let Some(bin) = binary {
            stmt.query_map(params![bin], RawRun::from_row)?
        } else {
            stmt.query_map([], RawRun::from_row)?
        };

        let runs = rows.map(|row| row?.into_record()).collect::<DbResult<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn load_run(&self, run_id: i64) -> DbResult<Option<DecompileRunRecord>> {
        let raw = self
            .conn
            .query_row(
                r#"
                SELECT id, binary, entries, status, started_at, finished_at, diagnostics, error
                FROM decompile_runs
                WHERE id = ?1
                "#,
                params![run_id],
                RawRun::from_row,
            )
            .optional()?;
        raw.map(RawRun::into_record).transpose()
    }

    /// Load the stored result of a run, or `None` if the run has no output.
    pub fn load_run_result(&self, run_id: i64) -> DbResult<Option<DecompileResult>> {
        let decompiled: Option<String> = self
            .conn
            .query_row(
                "SELECT decompiled FROM run_output WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(decompiled) = decompiled else {
            return Ok(None);
        };

        let mut assembly = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT idx, parent_start, data
                FROM run_assembly
                WHERE run_id = ?1
                ORDER BY idx
                "#,
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                let idx: i64 = row.get(0)?;
                let parent: i64 = row.get(1)?;
                Ok(Assembly { index: idx as usize, parents_start_address: parent as u64, data: row.get(2)? })
            })?;
            for row in rows {
                assembly.push(row?);
            }
        }

        let mut ir = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT parent_idx, data
                FROM run_ir
                WHERE run_id = ?1
                ORDER BY seq
                "#,
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                let parent: i64 = row.get(0)?;
                Ok(Ir { parents_assembly_index: parent as usize, data: row.get(1)? })
            })?;
            for row in rows {
                ir.push(row?);
            }
        }

        Ok(Some(DecompileResult { assembly, ir, decompiled }))
    }
}

fn map_binary(row: &rusqlite::Row<'_>) -> rusqlite::Result<BinaryRecord> {
    Ok(BinaryRecord { name: row.get(0)?, path: row.get(1)?, arch: row.get(2)?, hash: row.get(3)? })
}

/// Row of `decompile_runs` before its JSON columns are decoded.
struct RawRun {
    id: i64,
    binary: String,
    entries: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    diagnostics: Option<String>,
    error: Option<String>,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            binary: row.get(1)?,
            entries: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
            diagnostics: row.get(6)?,
            error: row.get(7)?,
        })
    }

    fn into_record(self) -> DbResult<DecompileRunRecord> {
        let status = self.status.parse::<RunStatus>().map_err(DbError::InvalidValue)?;
        let diagnostics = match self.diagnostics.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => Vec::new(),
        };
        Ok(DecompileRunRecord {
            id: Some(self.id),
            binary: self.binary,
            entries: serde_json::from_str(&self.entries)?,
            status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            diagnostics,
            error: self.error,
        })
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: initial schema (binaries)
/// - 2: add address-space tables (known_sections, section_units)
/// - 3: add decompile_runs and per-run output tables
/// - 4: add error column to decompile_runs (guarded in code)
/// - 5: add data/successors columns to section_units (guarded in code)
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let mut current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS binaries (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                arch TEXT,
                hash TEXT
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS known_sections (
                binary   TEXT NOT NULL,
                start_addr INTEGER NOT NULL,
                end_addr   INTEGER,
                analyzed INTEGER NOT NULL,
                PRIMARY KEY (binary, start_addr)
            );

            CREATE TABLE IF NOT EXISTS section_units (
                binary TEXT NOT NULL,
                start_addr INTEGER NOT NULL,
                end_addr   INTEGER NOT NULL,
                PRIMARY KEY (binary, start_addr)
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
        current_version = 2;
    }

    if current_version < 3 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS decompile_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                binary      TEXT NOT NULL,
                entries     TEXT NOT NULL,
                status      TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT,
                diagnostics TEXT
            );

            CREATE TABLE IF NOT EXISTS run_assembly (
                run_id       INTEGER NOT NULL,
                idx          INTEGER NOT NULL,
                parent_start INTEGER NOT NULL,
                data         TEXT NOT NULL,
                PRIMARY KEY (run_id, idx)
            );

            CREATE TABLE IF NOT EXISTS run_ir (
                run_id     INTEGER NOT NULL,
                seq        INTEGER NOT NULL,
                parent_idx INTEGER NOT NULL,
                data       TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE TABLE IF NOT EXISTS run_output (
                run_id     INTEGER PRIMARY KEY,
                decompiled TEXT NOT NULL
            );

            PRAGMA user_version = 3;
            COMMIT;
            "#,
        )?;
        current_version = 3;
    }

    if current_version < 4 {
        if !column_exists(conn, "decompile_runs", "error")? {
            conn.execute("ALTER TABLE decompile_runs ADD COLUMN error TEXT;", [])?;
        }
        conn.execute_batch("PRAGMA user_version = 4;")?;
    }

    if current_version < 5 {
        if !column_exists(conn, "section_units", "data")? {
            conn.execute("ALTER TABLE section_units ADD COLUMN data TEXT;", [])?;
        }
        if !column_exists(conn, "section_units", "successors")? {
            conn.execute("ALTER TABLE section_units ADD COLUMN successors TEXT;", [])?;
        }
        conn.execute_batch("PRAGMA user_version = 5;")?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in rows {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
