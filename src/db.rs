//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode so the page context and the background
//! worker can each hold their own connection to the same file. Provides
//! schema migrations, the `local_settings` helpers, and the shared
//! `DbState` handle.

use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::StoreError;

/// Fixed application namespace: one database per device install.
pub const DB_FILE_NAME: &str = "RestaurantPOS_DB.sqlite";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// A single connection plus the file it was opened from.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Wrap an already configured connection (tests, in-memory stores).
    pub fn from_connection(conn: Connection, db_path: impl Into<PathBuf>) -> Self {
        Self {
            conn: Mutex::new(conn),
            db_path: db_path.into(),
        }
    }

    /// Run `f` with the connection locked.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {e}")))?;
        f(&mut guard)
    }
}

/// Initialize the database at `{data_dir}/RestaurantPOS_DB.sqlite`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. Open failures are returned as-is, with
/// one exception: a file SQLite reports as not-a-database or corrupt is
/// renamed aside (never deleted) and a fresh database is created.
pub fn init(data_dir: &Path) -> Result<DbState, StoreError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| StoreError::Unavailable(format!("create data dir: {e}")))?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_raw(&db_path) {
        Ok(c) => c,
        Err(e) if is_corrupt(&e) => {
            let moved = quarantine(&db_path)?;
            warn!(
                error = %e,
                moved_to = %moved.display(),
                "Database file unreadable; kept aside and starting fresh"
            );
            open_raw(&db_path)?
        }
        Err(e) => return Err(e.into()),
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState::from_connection(conn, db_path))
}

/// Open an existing database without creating or migrating it.
///
/// Used by the background worker, which must never race the page context
/// on schema creation.
pub fn open_existing(db_path: &Path) -> Result<DbState, StoreError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    apply_pragmas(&conn)?;
    Ok(DbState::from_connection(conn, db_path))
}

/// Open the database file and apply pragmas.
pub(crate) fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    Ok(open_raw(path)?)
}

fn open_raw(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
}

fn is_corrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

/// Rename the database file and its WAL/SHM companions to
/// `*.corrupt-<millis>`. Returns the new path of the main file.
fn quarantine(db_path: &Path) -> Result<PathBuf, StoreError> {
    let stamp = chrono::Utc::now().timestamp_millis();
    let mut moved = db_path.to_path_buf();
    for suffix in ["", "-wal", "-shm"] {
        let from = PathBuf::from(format!("{}{suffix}", db_path.display()));
        if !from.exists() {
            continue;
        }
        let to = PathBuf::from(format!("{}{suffix}.corrupt-{stamp}", db_path.display()));
        fs::rename(&from, &to).map_err(|e| {
            StoreError::Unavailable(format!("move aside {}: {e}", from.display()))
        })?;
        if suffix.is_empty() {
            moved = to;
        }
    }
    Ok(moved)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub(crate) fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: menu cache, staff cache, pending-order queue.
///
/// Each table keeps its lookup columns next to a JSON `data` column holding
/// the full record.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS menu_items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_menu_items_name ON menu_items(name);
        CREATE INDEX IF NOT EXISTS idx_menu_items_category ON menu_items(category);

        CREATE TABLE IF NOT EXISTS staff (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_staff_role ON staff(role);

        -- Offline order queue. Never mirrored on the server.
        CREATE TABLE IF NOT EXISTS pending_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_orders_created_at ON pending_orders(created_at);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: local settings (persisted configuration overrides).
fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;
    info!("Applied migration v2");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a single setting.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Upsert a single setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// All settings in a category as `(key, value)` pairs.
pub fn get_category_settings(
    conn: &Connection,
    category: &str,
) -> Result<Vec<(String, String)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT setting_key, setting_value FROM local_settings
         WHERE setting_category = ?1 ORDER BY setting_key",
    )?;
    let rows = stmt
        .query_map(params![category], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<(String, String)>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// In-memory database with the full schema.
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState::from_connection(conn, ":memory:")
}

// ===========================================================================
// Tests
// ===========================================================================
