//! Local durable store.
//!
//! Table-scoped operations (get-all, get, put, bulk-put, delete, clear) over
//! the SQLite tables created in `db`. Every operation runs on the blocking
//! pool so async callers only suspend their own task. Records are kept as a
//! JSON `data` column next to the lookup columns each table indexes.
//!
//! The store knows nothing about the network; sequencing rules such as
//! "oldest first, delete on success" belong to its callers.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::db::{self, DbState};
use crate::error::StoreError;
use crate::models::{MenuCacheEntry, PendingOrder, StaffCacheEntry};

/// A record type bound to one table.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const TABLE: &'static str;
    /// Lookup columns stored beside `id` and `data`, in bind order.
    const INDEX_COLUMNS: &'static [&'static str];
    const ORDER_BY: &'static str;

    /// Primary key, or `None` to let the table assign one.
    fn key(&self) -> Option<i64>;
    fn assign_key(&mut self, _key: i64) {}
    fn index_values(&self) -> Vec<SqlValue>;
}

impl Record for MenuCacheEntry {
    const TABLE: &'static str = "menu_items";
    const INDEX_COLUMNS: &'static [&'static str] = &["name", "category"];
    const ORDER_BY: &'static str = "id";

    fn key(&self) -> Option<i64> {
        Some(self.id)
    }

    fn index_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.name.clone()),
            self.category
                .clone()
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
        ]
    }
}

impl Record for StaffCacheEntry {
    const TABLE: &'static str = "staff";
    const INDEX_COLUMNS: &'static [&'static str] = &["username", "role"];
    const ORDER_BY: &'static str = "id";

    fn key(&self) -> Option<i64> {
        Some(self.id)
    }

    fn index_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.username.clone()),
            SqlValue::Text(self.role.as_str().to_string()),
        ]
    }
}

impl Record for PendingOrder {
    const TABLE: &'static str = "pending_orders";
    const INDEX_COLUMNS: &'static [&'static str] = &["created_at"];
    const ORDER_BY: &'static str = "created_at ASC, id ASC";

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn assign_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn index_values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Integer(self.created_at.timestamp_millis())]
    }
}

// ---------------------------------------------------------------------------
// Synchronous table primitives (usable inside a transaction)
// ---------------------------------------------------------------------------

pub(crate) fn decode_row<R: Record>(id: i64, data: &str) -> Result<R, StoreError> {
    let mut record: R = serde_json::from_str(data)?;
    record.assign_key(id);
    Ok(record)
}

/// `(id, data)` pairs in table order, not yet decoded.
pub(crate) fn get_all_rows_sync<R: Record>(
    conn: &Connection,
) -> Result<Vec<(i64, String)>, StoreError> {
    let sql = format!("SELECT id, data FROM {} ORDER BY {}", R::TABLE, R::ORDER_BY);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn get_all_sync<R: Record>(conn: &Connection) -> Result<Vec<R>, StoreError> {
    get_all_rows_sync::<R>(conn)?
        .iter()
        .map(|(id, data)| decode_row::<R>(*id, data))
        .collect()
}

pub(crate) fn get_sync<R: Record>(conn: &Connection, key: i64) -> Result<Option<R>, StoreError> {
    let sql = format!("SELECT data FROM {} WHERE id = ?1", R::TABLE);
    let data: Option<String> = conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()?;
    data.map(|d| decode_row::<R>(key, &d)).transpose()
}

pub(crate) fn find_by_sync<R: Record>(
    conn: &Connection,
    column: &str,
    value: &str,
) -> Result<Option<R>, StoreError> {
    if !R::INDEX_COLUMNS.contains(&column) {
        return Err(StoreError::Constraint(format!(
            "{column} is not an indexed column of {}",
            R::TABLE
        )));
    }
    let sql = format!(
        "SELECT id, data FROM {} WHERE {column} = ?1 ORDER BY {} LIMIT 1",
        R::TABLE,
        R::ORDER_BY
    );
    let row: Option<(i64, String)> = conn
        .query_row(&sql, params![value], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    row.map(|(id, data)| decode_row::<R>(id, &data)).transpose()
}

pub(crate) fn put_sync<R: Record>(conn: &Connection, record: &R) -> Result<i64, StoreError> {
    let data = serde_json::to_string(record)?;
    let mut values = record.index_values();
    let cols = R::INDEX_COLUMNS.join(", ");

    match record.key() {
        Some(key) => {
            let placeholders: Vec<String> =
                (1..=R::INDEX_COLUMNS.len() + 2).map(|i| format!("?{i}")).collect();
            let updates: Vec<String> = R::INDEX_COLUMNS
                .iter()
                .chain(std::iter::once(&"data"))
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            let sql = format!(
                "INSERT INTO {} (id, {cols}, data) VALUES ({})
                 ON CONFLICT(id) DO UPDATE SET {}",
                R::TABLE,
                placeholders.join(", "),
                updates.join(", ")
            );
            values.insert(0, SqlValue::Integer(key));
            values.push(SqlValue::Text(data));
            conn.execute(&sql, params_from_iter(values))?;
            Ok(key)
        }
        None => {
            let placeholders: Vec<String> =
                (1..=R::INDEX_COLUMNS.len() + 1).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {} ({cols}, data) VALUES ({})",
                R::TABLE,
                placeholders.join(", ")
            );
            values.push(SqlValue::Text(data));
            conn.execute(&sql, params_from_iter(values))?;
            Ok(conn.last_insert_rowid())
        }
    }
}

pub(crate) fn delete_sync<R: Record>(conn: &Connection, key: i64) -> Result<bool, StoreError> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", R::TABLE);
    Ok(conn.execute(&sql, params![key])? > 0)
}

fn clear_sync<R: Record>(conn: &Connection) -> Result<usize, StoreError> {
    let sql = format!("DELETE FROM {}", R::TABLE);
    Ok(conn.execute(&sql, [])?)
}

fn count_sync<R: Record>(conn: &Connection) -> Result<usize, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {}", R::TABLE);
    let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(n.max(0) as usize)
}

// ---------------------------------------------------------------------------
// Async store handle
// ---------------------------------------------------------------------------

/// Process-wide handle to the durable store. Cheap to clone.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<DbState>,
}

impl LocalStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Open (creating and migrating if needed) the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(db::init(data_dir)?)))
    }

    pub fn db(&self) -> &Arc<DbState> {
        &self.db
    }

    pub fn table<R: Record>(&self) -> Table<R> {
        Table {
            store: self.clone(),
            _record: PhantomData,
        }
    }

    pub fn menu(&self) -> Table<MenuCacheEntry> {
        self.table()
    }

    pub fn staff(&self) -> Table<StaffCacheEntry> {
        self.table()
    }

    pub fn pending_orders(&self) -> Table<PendingOrder> {
        self.table()
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f)).await?
    }
}

/// Typed view of one table.
pub struct Table<R> {
    store: LocalStore,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> Table<R> {
    pub async fn get_all(&self) -> Result<Vec<R>, StoreError> {
        self.store.run(|conn| get_all_sync::<R>(conn)).await
    }

    /// Every row as `(key, raw JSON)`, so one unreadable record does not
    /// hide the others.
    pub async fn get_all_raw(&self) -> Result<Vec<(i64, String)>, StoreError> {
        self.store.run(|conn| get_all_rows_sync::<R>(conn)).await
    }

    pub async fn get(&self, key: i64) -> Result<Option<R>, StoreError> {
        self.store.run(move |conn| get_sync::<R>(conn, key)).await
    }

    /// First record whose indexed `column` equals `value`.
    pub async fn find_by(
        &self,
        column: &'static str,
        value: impl Into<String>,
    ) -> Result<Option<R>, StoreError> {
        let value = value.into();
        self.store
            .run(move |conn| find_by_sync::<R>(conn, column, &value))
            .await
    }

    /// Insert or replace by primary key. Returns the key.
    pub async fn put(&self, record: R) -> Result<i64, StoreError> {
        self.store.run(move |conn| put_sync(conn, &record)).await
    }

    /// Insert or replace many records in one transaction.
    pub async fn bulk_put(&self, records: Vec<R>) -> Result<Vec<i64>, StoreError> {
        self.store
            .run(move |conn| {
                let tx = conn.transaction()?;
                let keys = records
                    .iter()
                    .map(|r| put_sync(&tx, r))
                    .collect::<Result<Vec<_>, _>>()?;
                tx.commit()?;
                Ok(keys)
            })
            .await
    }

    /// Delete by primary key. Returns whether a row was removed.
    pub async fn delete(&self, key: i64) -> Result<bool, StoreError> {
        self.store.run(move |conn| delete_sync::<R>(conn, key)).await
    }

    pub async fn clear(&self) -> Result<usize, StoreError> {
        self.store.run(|conn| clear_sync::<R>(conn)).await
    }

    /// Clear the table and insert `records`, atomically.
    pub async fn replace_all(&self, records: Vec<R>) -> Result<usize, StoreError> {
        self.store
            .run(move |conn| {
                let tx = conn.transaction()?;
                clear_sync::<R>(&tx)?;
                for record in &records {
                    put_sync(&tx, record)?;
                }
                tx.commit()?;
                Ok(records.len())
            })
            .await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.run(|conn| count_sync::<R>(conn)).await
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> LocalStore {
    LocalStore::new(Arc::new(db::test_db()))
}
