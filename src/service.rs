//! Client-facing configuration operations
//!
//! `ConfigService` owns input shape checks and decides which schema governs a
//! write. It never touches storage until every check has passed, and it maps
//! store and schema failures onto [`ServiceError`] exactly once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::{ServiceError, ServiceResult};
use crate::model::ConfigVersion;
use crate::registry::SchemaValidator;
use crate::store::VersionStore;

/// Orchestrates create, update, read and rollback
#[derive(Clone)]
pub struct ConfigService {
    store: Arc<dyn VersionStore>,
    validator: Arc<dyn SchemaValidator>,
}

impl ConfigService {
    pub fn new(store: Arc<dyn VersionStore>, validator: Arc<dyn SchemaValidator>) -> Self {
        Self { store, validator }
    }

    /// Create version 1 of `name`, governed by `config_type` from now on.
    pub fn create(
        &self,
        cancel: &CancelToken,
        config_type: &str,
        name: &str,
        payload: &Value,
    ) -> ServiceResult<ConfigVersion> {
        let config_type = required("type", config_type)?;
        let name = required("name", name)?;
        non_empty(payload)?;

        self.check_schema(config_type, name, payload)?;

        Ok(self
            .store
            .create_first_version(cancel, config_type, name, payload)?)
    }

    /// Append a new version of an existing `name`, validated against its original type.
    pub fn update(
        &self,
        cancel: &CancelToken,
        name: &str,
        payload: &Value,
    ) -> ServiceResult<ConfigVersion> {
        let name = required("name", name)?;
        non_empty(payload)?;

        // The latest row carries the immutable type; Update never creates a name
        let latest = self.store.read_latest(cancel, name)?;
        self.check_schema(&latest.config_type, name, payload)?;

        Ok(self.store.append_next_version(cancel, name, payload)?)
    }

    /// Latest version when `version` is `None`, otherwise that exact version.
    pub fn get(
        &self,
        cancel: &CancelToken,
        name: &str,
        version: Option<i64>,
    ) -> ServiceResult<ConfigVersion> {
        let name = required("name", name)?;
        let found = match version {
            None => self.store.read_latest(cancel, name)?,
            Some(version) => {
                positive("version", version)?;
                self.store.read_version(cancel, name, version)?
            }
        };
        Ok(found)
    }

    /// Full history of `name`, oldest first. Unknown names yield an empty list.
    pub fn list_versions(
        &self,
        cancel: &CancelToken,
        name: &str,
    ) -> ServiceResult<Vec<ConfigVersion>> {
        let name = required("name", name)?;
        Ok(self.store.read_all_versions(cancel, name)?)
    }

    /// Replay the payload of `target_version` as a brand new version.
    ///
    /// The payload is not re-validated: it passed the same type's schema when
    /// it was first written.
    pub fn rollback(
        &self,
        cancel: &CancelToken,
        name: &str,
        target_version: i64,
    ) -> ServiceResult<ConfigVersion> {
        let name = required("name", name)?;
        positive("version", target_version)?;

        let target = self.store.read_version(cancel, name, target_version)?;
        let restored = self.store.append_next_version(cancel, name, &target.data)?;

        info!(
            name,
            from = target_version,
            to = restored.version,
            "rolled back config"
        );
        Ok(restored)
    }

    /// Registered config types, sorted
    pub fn types(&self) -> Vec<String> {
        self.validator.types()
    }

    /// Dry-run the schema check for `config_type` without touching storage.
    pub fn validate(&self, config_type: &str, payload: &Value) -> ServiceResult<()> {
        let config_type = required("type", config_type)?;
        non_empty(payload)?;
        Ok(self.validator.validate(config_type, payload)?)
    }

    fn check_schema(&self, config_type: &str, name: &str, payload: &Value) -> ServiceResult<()> {
        self.validator.validate(config_type, payload).map_err(|err| {
            warn!(name, config_type, error = %err, "rejected payload");
            ServiceError::from(err)
        })
    }
}

/// Turn raw client text into a payload.
pub fn parse_payload(raw: &str) -> ServiceResult<Value> {
    if raw.trim().is_empty() {
        return Err(ServiceError::invalid("empty data"));
    }
    serde_json::from_str(raw).map_err(|e| ServiceError::invalid(format!("malformed JSON: {e}")))
}

fn required<'a>(field: &str, value: &'a str) -> ServiceResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::invalid(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn positive(field: &str, value: i64) -> ServiceResult<()> {
    if value <= 0 {
        return Err(ServiceError::invalid(format!(
            "{field} must be a positive integer, got {value}"
        )));
    }
    Ok(())
}

fn non_empty(payload: &Value) -> ServiceResult<()> {
    if payload.is_null() {
        return Err(ServiceError::invalid("empty data"));
    }
    Ok(())
}
