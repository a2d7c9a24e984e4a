//! SQLite-backed key-value store with optional AES-GCM encryption of values at rest.
//! Key derived from a device-bound secret when encryption is enabled.

use super::KeyValueStore;
use crate::encryption::PayloadEncryptor;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    cipher: Option<Arc<PayloadEncryptor>>,
}

impl SqliteStore {
    /// Open or create the DB at `path`. Values are stored as plain text.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn, None)
    }

    /// Open or create the DB at `path`; values are encrypted with a key derived from `secret`.
    pub fn open_encrypted(path: &Path, secret: &[u8]) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn, Some(PayloadEncryptor::from_secret(secret)))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, cipher: Option<PayloadEncryptor>) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher: cipher.map(Arc::new),
        })
    }

    /// Run a blocking statement off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }

    /// Retention: delete expired rows. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM kv WHERE expires_at <= ?1", params![now])?;
            Ok(n as u64)
        })
        .await
    }

    fn seal(&self, value: &str) -> Result<String, StoreError> {
        match &self.cipher {
            Some(cipher) => cipher
                .encrypt(value, None)
                .map_err(|e| StoreError::Unavailable(e.to_string())),
            None => Ok(value.to_string()),
        }
    }

    fn open_value(&self, stored: String) -> Result<String, StoreError> {
        match &self.cipher {
            Some(cipher) => match cipher.decrypt(&stored, None) {
                Ok(serde_json::Value::String(s)) => Ok(s),
                Ok(_) => Err(StoreError::Unavailable("unexpected stored value".into())),
                Err(e) => Err(StoreError::Unavailable(e.to_string())),
            },
            None => Ok(stored),
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let sealed = self.seal(value)?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (namespace, key, value, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![namespace, key, sealed, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now().timestamp_millis();
        let (namespace, key) = (namespace.to_string(), key.to_string());
        let stored = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2 AND expires_at > ?3",
                        params![namespace, key, now],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        stored.map(|s| self.open_value(s)).transpose()
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Utc::now().timestamp_millis();
        let pattern = pattern.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT namespace || ':' || key FROM kv WHERE (namespace || ':' || key) GLOB ?1 AND expires_at > ?2",
            )?;
            let rows = stmt.query_map(params![pattern, now], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(())
        })
        .await
    }
}
