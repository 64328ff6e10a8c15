//! Version storage
//!
//! The append-only `configs` table and the transactional operations over it.
//! This is the only part of the crate that touches shared state.

mod migrate;
mod sqlite;

pub use migrate::{bundled as bundled_migrations, Migration};
pub use sqlite::SqliteVersionStore;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::StoreResult;
use crate::model::ConfigVersion;

/// Trait for configuration version storage
pub trait VersionStore: Send + Sync {
    /// Insert version 1 of a new name.
    ///
    /// Fails with `AlreadyExists` when the uniqueness constraint on
    /// `(name, version)` fires; there is no read beforehand.
    fn create_first_version(
        &self,
        cancel: &CancelToken,
        config_type: &str,
        name: &str,
        payload: &Value,
    ) -> StoreResult<ConfigVersion>;

    /// Append `max(version) + 1` for an existing name, inheriting its type.
    ///
    /// Read, insert and read-back run as one unit: no two callers can both
    /// commit the same version, and no version number is skipped.
    fn append_next_version(
        &self,
        cancel: &CancelToken,
        name: &str,
        payload: &Value,
    ) -> StoreResult<ConfigVersion>;

    /// The row with the highest version for `name`
    fn read_latest(&self, cancel: &CancelToken, name: &str) -> StoreResult<ConfigVersion>;

    /// The exact `(name, version)` row
    fn read_version(
        &self,
        cancel: &CancelToken,
        name: &str,
        version: i64,
    ) -> StoreResult<ConfigVersion>;

    /// Every row for `name`, ascending by version; empty when nothing matches
    fn read_all_versions(&self, cancel: &CancelToken, name: &str)
        -> StoreResult<Vec<ConfigVersion>>;
}
