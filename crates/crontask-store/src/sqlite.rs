use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{types::Value, Connection};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::kv::{prefix_end, BatchOp, KvStore, ScanRange, WriteBatch};

/// Initialise the key/value schema in `conn`.
///
/// A single `kv` table; SQLite compares BLOB keys with `memcmp`, which gives
/// the same lexicographic order as [`crate::kv::MemoryKv`].
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key    BLOB NOT NULL PRIMARY KEY,
            value  BLOB NOT NULL
        ) STRICT, WITHOUT ROWID;
        ",
    )?;
    Ok(())
}

/// [`KvStore`] on a single SQLite connection. Every batch is one transaction.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open (or create) a database file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(crontask_core::CoreError::from)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
        debug!(path = %path.display(), "opened sqlite kv store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut put = tx.prepare_cached(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            let mut del = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for op in batch {
                match op {
                    BatchOp::Put { key, value } => {
                        put.execute(rusqlite::params![key, value])?;
                    }
                    BatchOp::Delete { key } => {
                        del.execute([key])?;
                    }
                }
            }
        }
        // Dropping `tx` without commit rolls back, so an error above leaves
        // the table untouched.
        tx.commit()?;
        Ok(())
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut sql = String::from("SELECT key, value FROM kv WHERE key >= ?1");
        let mut args: Vec<Value> = vec![Value::Blob(range.prefix.clone())];

        if let Some(end) = prefix_end(&range.prefix) {
            args.push(Value::Blob(end));
            sql.push_str(&format!(" AND key < ?{}", args.len()));
        }
        if let Some(cursor) = &range.start_after {
            args.push(Value::Blob(cursor.clone()));
            let op = if range.reverse { "<" } else { ">" };
            sql.push_str(&format!(" AND key {op} ?{}", args.len()));
        }

        let limit = range
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(-1);
        args.push(Value::Integer(limit));
        let order = if range.reverse { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY key {order} LIMIT ?{}", args.len()));

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
