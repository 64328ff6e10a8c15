//! SQLite-backed version store
//!
//! Writers serialize on SQLite's write lock: every write runs inside a
//! `BEGIN IMMEDIATE` transaction, so the read of `max(version)` and the insert
//! of `max(version) + 1` cannot interleave with another writer. The primary
//! key on `(name, version)` is the last line of defence; if it ever fires
//! during an append, or the engine stays locked past the busy timeout, the
//! whole sequence is retried a bounded number of times.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{migrate, VersionStore};
use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::model::ConfigVersion;

const INSERT_VERSION: &str =
    "INSERT INTO configs(name, type, version, data) VALUES (?1, ?2, ?3, ?4)";

const SELECT_HEAD: &str =
    "SELECT version, type FROM configs WHERE name = ?1 ORDER BY version DESC LIMIT 1";

const SELECT_EXACT: &str = "SELECT name, type, version, data, created_at FROM configs
     WHERE name = ?1 AND version = ?2";

const SELECT_LATEST: &str = "SELECT name, type, version, data, created_at FROM configs
     WHERE name = ?1 ORDER BY version DESC LIMIT 1";

const SELECT_ALL: &str = "SELECT name, type, version, data, created_at FROM configs
     WHERE name = ?1 ORDER BY version ASC";

/// SQLite-backed version store
///
/// Safe to share between threads; each operation checks out its own
/// connection, and idle connections are kept for reuse.
pub struct SqliteVersionStore {
    path: PathBuf,
    busy_timeout: Duration,
    wal: bool,
    max_idle: usize,
    max_append_attempts: u32,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteVersionStore {
    /// Open (or create) the database described by `config` and apply pending migrations
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            path: config.path.clone(),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            wal: config.wal,
            max_idle: config.max_idle_connections,
            max_append_attempts: config.max_append_attempts.max(1),
            idle: Mutex::new(Vec::new()),
        };

        let mut conn = store.connect()?;
        let applied = migrate::run(&mut conn)?;
        store.release(conn);

        info!(path = %store.path.display(), migrations = applied, "opened version store");
        Ok(store)
    }

    /// Open a database at `path` with default settings
    pub fn open_path(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        if self.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "opened connection");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn checkout(&self, cancel: &CancelToken) -> StoreResult<Connection> {
        cancel.check()?;
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.connect()?,
        };
        // Never wait on the write lock past the caller's deadline
        let wait = cancel
            .remaining()
            .map_or(self.busy_timeout, |left| left.min(self.busy_timeout));
        conn.busy_timeout(wait)?;
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    /// Run `op` on a checked-out connection. Any transaction opened inside
    /// `op` is committed or dropped (rolled back) before the connection
    /// goes back to the idle list.
    fn with_connection<T>(
        &self,
        cancel: &CancelToken,
        op: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.checkout(cancel)?;
        let result = op(&mut conn);
        self.release(conn);
        result
    }
}

/// One `configs` row as stored
struct StoredRow {
    name: String,
    config_type: String,
    version: i64,
    data: String,
    created_at: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            config_type: row.get(1)?,
            version: row.get(2)?,
            data: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_version(self) -> StoreResult<ConfigVersion> {
        Ok(ConfigVersion {
            name: self.name,
            config_type: self.config_type,
            version: self.version,
            data: serde_json::from_str(&self.data)?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
        })
    }
}

fn read_exact(conn: &Connection, name: &str, version: i64) -> StoreResult<ConfigVersion> {
    conn.query_row(SELECT_EXACT, params![name, version], StoredRow::from_row)
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
            version: Some(version),
        })?
        .into_version()
}

/// One attempt at the read-compute-insert sequence.
fn try_append(
    conn: &mut Connection,
    cancel: &CancelToken,
    name: &str,
    data: &str,
) -> StoreResult<ConfigVersion> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let head: Option<(i64, String)> = tx
        .query_row(SELECT_HEAD, params![name], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    let (latest, config_type) = head.ok_or_else(|| StoreError::NotFound {
        name: name.to_string(),
        version: None,
    })?;
    let next = latest + 1;

    cancel.check()?;
    tx.execute(INSERT_VERSION, params![name, config_type, next, data])
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::WriteConflict {
                    name: name.to_string(),
                    version: next,
                }
            } else {
                err.into()
            }
        })?;

    let inserted = read_exact(&tx, name, next)?;
    cancel.check()?;
    tx.commit()?;
    Ok(inserted)
}

impl VersionStore for SqliteVersionStore {
    fn create_first_version(
        &self,
        cancel: &CancelToken,
        config_type: &str,
        name: &str,
        payload: &Value,
    ) -> StoreResult<ConfigVersion> {
        let data = serde_json::to_string(payload)?;
        let created = self.with_connection(cancel, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(INSERT_VERSION, params![name, config_type, 1_i64, data])
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        StoreError::AlreadyExists {
                            name: name.to_string(),
                        }
                    } else {
                        err.into()
                    }
                })?;
            let inserted = read_exact(&tx, name, 1)?;
            cancel.check()?;
            tx.commit()?;
            Ok(inserted)
        })?;

        info!(name, config_type, "created config");
        Ok(created)
    }

    fn append_next_version(
        &self,
        cancel: &CancelToken,
        name: &str,
        payload: &Value,
    ) -> StoreResult<ConfigVersion> {
        let data = serde_json::to_string(payload)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.with_connection(cancel, |conn| try_append(conn, cancel, name, &data)) {
                Err(err) if err.is_retryable() => {
                    if attempt >= self.max_append_attempts {
                        warn!(name, attempts = attempt, error = %err, "append retries exhausted");
                        return Err(StoreError::Conflict {
                            name: name.to_string(),
                            attempts: attempt,
                        });
                    }
                    debug!(name, attempt, error = %err, "append conflicted, retrying");
                }
                Ok(appended) => {
                    info!(name, version = appended.version, "appended config version");
                    return Ok(appended);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn read_latest(&self, cancel: &CancelToken, name: &str) -> StoreResult<ConfigVersion> {
        debug!(name, "reading latest version");
        self.with_connection(cancel, |conn| {
            conn.query_row(SELECT_LATEST, params![name], StoredRow::from_row)
                .optional()?
                .ok_or_else(|| StoreError::NotFound {
                    name: name.to_string(),
                    version: None,
                })?
                .into_version()
        })
    }

    fn read_version(
        &self,
        cancel: &CancelToken,
        name: &str,
        version: i64,
    ) -> StoreResult<ConfigVersion> {
        debug!(name, version, "reading version");
        self.with_connection(cancel, |conn| read_exact(conn, name, version))
    }

    fn read_all_versions(
        &self,
        cancel: &CancelToken,
        name: &str,
    ) -> StoreResult<Vec<ConfigVersion>> {
        debug!(name, "reading all versions");
        self.with_connection(cancel, |conn| {
            let mut stmt = conn.prepare_cached(SELECT_ALL)?;
            let rows = stmt
                .query_map(params![name], StoredRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(StoredRow::into_version).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Interrupted;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> SqliteVersionStore {
        SqliteVersionStore::open_path(dir.path().join("configs.db")).unwrap()
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/data/configs.db");
        let store = SqliteVersionStore::open_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = tempdir().unwrap();
        let cancel = CancelToken::new();
        {
            let store = open_store(&dir);
            store
                .create_first_version(&cancel, "feature_toggle", "qris", &json!({"enabled": true}))
                .unwrap();
        }
        let store = open_store(&dir);
        let latest = store.read_latest(&cancel, "qris").unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.data, json!({"enabled": true}));
    }

    #[test]
    fn test_create_reads_back_generated_timestamp() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let before = Utc::now() - chrono::Duration::seconds(5);
        let created = store
            .create_first_version(&CancelToken::new(), "feature_toggle", "qris", &json!({"enabled": true}))
            .unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.config_type, "feature_toggle");
        assert!(created.created_at > before);
    }

    #[test]
    fn test_cancelled_token_never_writes() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let live = CancelToken::new();
        store
            .create_first_version(&live, "feature_toggle", "qris", &json!({"enabled": true}))
            .unwrap();

        let cancelled = CancelToken::new();
        cancelled.cancel();
        let err = store
            .append_next_version(&cancelled, "qris", &json!({"enabled": false}))
            .unwrap_err();
        assert!(matches!(err, StoreError::Interrupted(Interrupted::Cancelled)));

        let all = store.read_all_versions(&live, "qris").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_idle_connections_are_bounded() {
        let dir = tempdir().unwrap();
        let store = SqliteVersionStore::open(&StoreConfig {
            path: dir.path().join("configs.db"),
            max_idle_connections: 1,
            ..StoreConfig::default()
        })
        .unwrap();

        store.release(store.connect().unwrap());
        store.release(store.connect().unwrap());
        assert_eq!(store.idle.lock().unwrap().len(), 1);
    }
}
