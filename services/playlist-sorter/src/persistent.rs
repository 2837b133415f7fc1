//!
//! src/persistent.rs  Andrew Belles  Oct 2025
//!
//! Defines the keyed cache store the pipeline reads and merges into.
//! A table is either one playlist's tracks or the global artist table;
//! rows are json objects keyed by catalog id, kept in insertion order.
//! The sqlite backend lives here, the compressed snapshot backend in src/sink.rs
//!

use std::{collections::HashMap, str::FromStr, sync::{Arc, Mutex, PoisonError}};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, Pool, Row as _, Sqlite};
use tokio::sync::OwnedMutexGuard;

use crate::errors::SorterError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableId {
    Tracks(String),
    Artists
}

impl TableId {
    pub fn tracks(playlist_id: &str) -> Self {
        TableId::Tracks(playlist_id.to_string())
    }

    pub fn name(&self) -> String {
        match self {
            TableId::Tracks(playlist_id) => format!("playlist-{playlist_id}"),
            TableId::Artists => "artists".to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: String,
    pub fields: Map<String, Value>
}

impl Row {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self { key: key.into(), fields }
    }

    /// Serializes any struct-shaped record into a row
    pub fn encode<T: Serialize>(key: impl Into<String>, record: &T) ->
        Result<Self, SorterError> {
        match serde_json::to_value(record)? {
            Value::Object(fields) => Ok( Self::new(key, fields) ),
            other => Err(SorterError::Parse(
                format!("record must serialize to an object, got {other}")
            ))
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SorterError> {
        Ok( serde_json::from_value(Value::Object(self.fields.clone()))? )
    }

    /// Column present and not null
    pub fn is_populated(&self, column: &str) -> bool {
        self.fields.get(column).is_some_and(|v| !v.is_null())
    }
}

/// Copies every non-null field of `update` that is absent or null in `existing`.
/// Returns whether anything changed.
pub(crate) fn fill_columns(existing: &mut Map<String, Value>, update: &Map<String, Value>)
    -> bool {
    let mut changed = false;
    for (column, value) in update {
        if value.is_null() {
            continue;
        }
        match existing.get(column) {
            Some(current) if !current.is_null() => {}
            _ => {
                existing.insert(column.clone(), value.clone());
                changed = true;
            }
        }
    }
    changed
}

///
/// Keyed store interface. Both merges are additive and idempotent:
/// nothing already stored is ever overwritten by them.
///
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Full table in insertion order, empty if the table was never written
    async fn load(&self, table: &TableId) -> Result<Vec<Row>, SorterError>;

    async fn get(&self, table: &TableId, key: &str) -> Result<Option<Row>, SorterError>;

    /// Inserts or replaces one row, keeping its position if it existed
    async fn put(&self, table: &TableId, row: Row) -> Result<(), SorterError>;

    /// Inserts rows whose key is absent; returns how many were inserted
    async fn merge(&self, table: &TableId, rows: Vec<Row>) -> Result<usize, SorterError>;

    /// Fills absent/null columns of existing rows; returns rows changed
    async fn merge_columns(&self, table: &TableId, updates: Vec<Row>) ->
        Result<usize, SorterError>;

    async fn count(&self, table: &TableId) -> Result<usize, SorterError>;
}

///
/// One async mutex per table so read-modify-write cycles on the
/// same table serialize while different tables proceed independently
///
#[derive(Debug, Default)]
pub struct TableLocks {
    inner: Mutex<HashMap<TableId, Arc<tokio::sync::Mutex<()>>>>
}

impl TableLocks {
    pub async fn lock(&self, table: &TableId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(table.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct SqliteStore {
    pool: Pool<Sqlite>,
    /// one writer per process: a deferred transaction that reads and then
    /// writes fails with SQLITE_BUSY_SNAPSHOT if another writer commits first
    writes: tokio::sync::Mutex<()>
}

impl SqliteStore {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), SorterError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS cache_rows (
              seq         INTEGER PRIMARY KEY AUTOINCREMENT,
              table_name  TEXT NOT NULL,
              key         TEXT NOT NULL,
              fields      TEXT NOT NULL,
              created_at  INTEGER NOT NULL,
              updated_at  INTEGER NOT NULL,
              UNIQUE (table_name, key)
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_rows_table ON cache_rows(table_name, seq);"
        ).execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str) -> Result<Self, SorterError> {
        let is_memory = database_url == "sqlite::memory:";

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // WAL is file-only; don't set it for in-memory
        if !is_memory {
            opts = opts.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                       .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {8})
            .connect_with(opts)
            .await?;

        Self::ensure_schema(&pool).await?;

        Ok( Self { pool, writes: tokio::sync::Mutex::new(()) } )
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn parse_fields(raw: &str) -> Result<Map<String, Value>, SorterError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(fields) => Ok(fields),
            _ => Err(SorterError::Db("cache row is not a json object".into()))
        }
    }
}

#[async_trait]
impl KeyedStore for SqliteStore {
    async fn load(&self, table: &TableId) -> Result<Vec<Row>, SorterError> {
        let rows = sqlx::query(
            "SELECT key, fields FROM cache_rows WHERE table_name = ?1 ORDER BY seq ASC;"
        )
        .bind(table.name())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<Row, SorterError> {
                let key: String = r.get("key");
                let fields: String = r.get("fields");
                Ok( Row::new(key, Self::parse_fields(&fields)?) )
            })
            .collect()
    }

    async fn get(&self, table: &TableId, key: &str) -> Result<Option<Row>, SorterError> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT fields FROM cache_rows WHERE table_name = ?1 AND key = ?2;"
        )
        .bind(table.name())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match raw {
            Some(fields) => Ok( Some(Row::new(key, Self::parse_fields(&fields)?)) ),
            None => Ok(None)
        }
    }

    async fn put(&self, table: &TableId, row: Row) -> Result<(), SorterError> {
        let _guard = self.writes.lock().await;
        sqlx::query(
            r"
            INSERT INTO cache_rows (table_name, key, fields, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(table_name, key) DO UPDATE SET
                fields = excluded.fields,
                updated_at = excluded.updated_at;
            "
        )
        .bind(table.name())
        .bind(&row.key)
        .bind(serde_json::to_string(&row.fields)?)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge(&self, table: &TableId, rows: Vec<Row>) -> Result<usize, SorterError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let _guard = self.writes.lock().await;
        let name = table.name();
        let now = Self::now();
        let mut inserted = 0_u64;

        let mut tx = self.pool.begin().await?;
        for row in &rows {
            inserted += sqlx::query(
                r"
                INSERT OR IGNORE INTO cache_rows (
                    table_name, key, fields, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?4);
                "
            )
            .bind(&name)
            .bind(&row.key)
            .bind(serde_json::to_string(&row.fields)?)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(inserted as usize)
    }

    async fn merge_columns(&self, table: &TableId, updates: Vec<Row>) ->
        Result<usize, SorterError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let _guard = self.writes.lock().await;
        let name = table.name();
        let now = Self::now();
        let mut changed = 0_usize;

        let mut tx = self.pool.begin().await?;
        for update in &updates {
            let raw: Option<String> = sqlx::query_scalar(
                "SELECT fields FROM cache_rows WHERE table_name = ?1 AND key = ?2;"
            )
            .bind(&name)
            .bind(&update.key)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(raw) = raw else {
                continue;
            };
            let mut fields = Self::parse_fields(&raw)?;
            if !fill_columns(&mut fields, &update.fields) {
                continue;
            }

            sqlx::query(
                "UPDATE cache_rows SET fields = ?1, updated_at = ?2
                    WHERE table_name = ?3 AND key = ?4;"
            )
            .bind(serde_json::to_string(&fields)?)
            .bind(now)
            .bind(&name)
            .bind(&update.key)
            .execute(&mut *tx)
            .await?;
            changed += 1;
        }
        tx.commit().await?;

        Ok(changed)
    }

    async fn count(&self, table: &TableId) -> Result<usize, SorterError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cache_rows WHERE table_name = ?1;"
        )
        .bind(table.name())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }
}
