//! Embedded SQL migrations
//!
//! Files under `migrations/` are compiled in and applied in file-name order.
//! Each one runs at most once per database, recorded in `schema_migrations`.

use include_dir::{include_dir, Dir};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::error::{StoreError, StoreResult};

static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// A single migration script
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// All bundled migrations, sorted by name
pub fn bundled() -> Vec<Migration> {
    let mut migrations: Vec<Migration> = MIGRATIONS_DIR
        .files()
        .filter(|f| f.path().extension().is_some_and(|ext| ext == "sql"))
        .filter_map(|f| {
            Some(Migration {
                name: f.path().file_name()?.to_str()?,
                sql: f.contents_utf8()?,
            })
        })
        .collect();
    migrations.sort_by_key(|m| m.name);
    migrations
}

/// Apply every pending migration. Returns how many ran.
pub(crate) fn run(conn: &mut Connection) -> StoreResult<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name       TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let mut applied = 0;
    for migration in bundled() {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let done: Option<String> = tx
            .query_row(
                "SELECT name FROM schema_migrations WHERE name = ?1",
                params![migration.name],
                |row| row.get(0),
            )
            .optional()?;
        if done.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)
            .map_err(|source| StoreError::Migration {
                name: migration.name.to_string(),
                source,
            })?;
        tx.execute(
            "INSERT INTO schema_migrations(name) VALUES (?1)",
            params![migration.name],
        )?;
        tx.commit()?;

        info!(migration = migration.name, "applied migration");
        applied += 1;
    }
    Ok(applied)
}
