//! SQLite-backed storage implementation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::{closed_error, Backend};
use crate::config::BackendConfig;
use crate::error::StoreError;

/// Maximum bound parameters per `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;

/// Wait between pool sweeps when every connection is checked out.
const POOL_BACKOFF_MIN: Duration = Duration::from_micros(200);
const POOL_BACKOFF_MAX: Duration = Duration::from_millis(10);

/// Fixed-size pool of SQLite connections.
struct ConnectionPool {
    conns: Vec<Mutex<Option<Connection>>>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Check out whichever connection frees up first.
    ///
    /// Runs on the blocking pool, so waiting is a sleep between full sweeps
    /// of `try_lock` rather than a park on one particular slot.
    fn get(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let mut backoff = POOL_BACKOFF_MIN;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(closed_error("sqlite"));
            }
            for offset in 0..self.conns.len() {
                let slot = &self.conns[(start + offset) % self.conns.len()];
                match slot.try_lock() {
                    Ok(guard) => return Ok(guard),
                    Err(TryLockError::WouldBlock) => {}
                    Err(TryLockError::Poisoned(_)) => {
                        return Err(StoreError::Internal(
                            "sqlite pool lock poisoned".to_string(),
                        ))
                    }
                }
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(POOL_BACKOFF_MAX);
        }
    }
}

/// SQLite-backed store.
///
/// rusqlite is blocking, so every call runs on the blocking thread pool.
/// A call abandoned by cancellation still finishes its single statement.
pub struct SqliteBackend {
    pool: Arc<ConnectionPool>,
}

impl SqliteBackend {
    /// Open the database at `config.address`, creating tables if needed.
    pub fn open(config: &BackendConfig) -> Result<Self, StoreError> {
        let in_memory = config.address == ":memory:";
        // Every in-memory connection is a separate database, so share one.
        let pool_size = if in_memory { 1 } else { config.pool_size.max(1) };

        let mut conns = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = if in_memory {
                Connection::open_in_memory()?
            } else {
                Connection::open(&config.address)?
            };
            conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            if !in_memory {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
            }
            conns.push(conn);
        }

        if let Some(first) = conns.first() {
            Self::initialize_schema(first)?;
        }

        info!(
            address = %config.address,
            pool_size,
            "Opened sqlite backend"
        );

        Ok(Self {
            pool: Arc::new(ConnectionPool {
                conns: conns.into_iter().map(|c| Mutex::new(Some(c))).collect(),
                next: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Create an in-memory SQLite backend (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(&BackendConfig {
            kind: crate::config::BackendKind::Sqlite,
            address: ":memory:".to_string(),
            ..Default::default()
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS numeric_index (
                field TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (field, ticket_id)
            );

            CREATE INDEX IF NOT EXISTS idx_numeric_index_value ON numeric_index(field, value);

            CREATE TABLE IF NOT EXISTS tag_index (
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                PRIMARY KEY (field, value, ticket_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tag_index_ticket ON tag_index(field, ticket_id);

            CREATE TABLE IF NOT EXISTS indexed_tickets (
                ticket_id TEXT PRIMARY KEY
            );
            "#,
        )?;
        Ok(())
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut guard = pool.get()?;
            let conn = guard.as_mut().ok_or_else(|| closed_error("sqlite"))?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("sqlite task failed: {}", e)))?
    }

    fn collect_ids(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_ticket(&self, id: &str, payload: String) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO tickets (id, payload) VALUES (?, ?)",
                params![id, payload],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<String>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let payload = conn
                .query_row(
                    "SELECT payload FROM tickets WHERE id = ?",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(payload)
        })
        .await
    }

    async fn get_tickets(&self, ids: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let mut found = std::collections::HashMap::with_capacity(ids.len());
            for chunk in ids.chunks(LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT id, payload FROM tickets WHERE id IN ({})",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (id, payload) = row?;
                    found.insert(id, payload);
                }
            }

            Ok(ids.iter().map(|id| found.remove(id)).collect())
        })
        .await
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM tickets WHERE id = ?", params![id])?;
            Ok(())
        })
        .await
    }

    async fn numeric_insert(&self, field: &str, id: &str, value: f64) -> Result<(), StoreError> {
        let (field, id) = (field.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO numeric_index (field, ticket_id, value) VALUES (?, ?, ?)
                 ON CONFLICT(field, ticket_id) DO UPDATE SET value = excluded.value",
                params![field, id, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn numeric_remove(&self, field: &str, id: &str) -> Result<(), StoreError> {
        let (field, id) = (field.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM numeric_index WHERE field = ? AND ticket_id = ?",
                params![field, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn numeric_range(
        &self,
        field: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let field = field.to_string();
        self.with_conn(move |conn| {
            Self::collect_ids(
                conn,
                "SELECT ticket_id FROM numeric_index WHERE field = ? AND value BETWEEN ? AND ?",
                params![field, min, max],
            )
        })
        .await
    }

    async fn tag_insert(
        &self,
        field: &str,
        id: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        let (field, id, values) = (field.to_string(), id.to_string(), values.to_vec());
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM tag_index WHERE field = ? AND ticket_id = ?",
                params![field, id],
            )?;
            for value in &values {
                tx.execute(
                    "INSERT OR IGNORE INTO tag_index (field, value, ticket_id) VALUES (?, ?, ?)",
                    params![field, value, id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn tag_remove(&self, field: &str, id: &str) -> Result<(), StoreError> {
        let (field, id) = (field.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM tag_index WHERE field = ? AND ticket_id = ?",
                params![field, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn tag_members(&self, field: &str, value: &str) -> Result<Vec<String>, StoreError> {
        let (field, value) = (field.to_string(), value.to_string());
        self.with_conn(move |conn| {
            Self::collect_ids(
                conn,
                "SELECT ticket_id FROM tag_index WHERE field = ? AND value = ?",
                params![field, value],
            )
        })
        .await
    }

    async fn registry_insert(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO indexed_tickets (ticket_id) VALUES (?)",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    async fn registry_remove(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM indexed_tickets WHERE ticket_id = ?",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    async fn registry_members(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| Self::collect_ids(conn, "SELECT ticket_id FROM indexed_tickets", []))
            .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.pool.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            for slot in &pool.conns {
                let taken = match slot.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(_) => None,
                };
                if let Some(conn) = taken {
                    conn.close().map_err(|(_, e)| StoreError::from(e))?;
                }
            }
            debug!("Closed sqlite connections");
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("sqlite task failed: {}", e)))?
    }
}
