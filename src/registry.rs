//! Schema Registry
//!
//! An immutable catalog of JSON Schema documents keyed by config type. The
//! built-in catalog is compiled into the binary from `schemas/` and each
//! document is compiled into a validator once, at construction.
//!
//! ```text
//! schemas/
//! ├── feature_toggle.schema.json
//! ├── experiment_config.schema.json
//! ├── service_client.schema.json
//! └── ...
//! ```

use std::collections::BTreeMap;
use std::fmt;

use include_dir::{include_dir, Dir};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};

static BUILTIN_SCHEMAS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/schemas");

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Validates payloads against the schema registered for a config type.
///
/// This is the seam the service depends on; swap it out in tests.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, config_type: &str, payload: &Value) -> SchemaResult<()>;

    /// Config types this validator knows, sorted
    fn types(&self) -> Vec<String>;
}

struct RegisteredSchema {
    document: Value,
    compiled: JSONSchema,
}

/// Read-only mapping of config type to compiled schema
pub struct SchemaRegistry {
    schemas: BTreeMap<String, RegisteredSchema>,
}

impl SchemaRegistry {
    /// The catalog shipped with the crate
    pub fn builtin() -> SchemaResult<Self> {
        Self::from_embedded(&BUILTIN_SCHEMAS)
    }

    /// Load every `*.schema.json` file from an embedded directory (compiled via include_dir!)
    pub fn from_embedded(dir: &'static Dir<'static>) -> SchemaResult<Self> {
        let mut documents = Vec::new();
        collect_embedded(dir, &mut documents)?;
        Self::from_documents(documents)
    }

    /// Build a registry from `(config type, schema document)` pairs
    pub fn from_documents<I>(documents: I) -> SchemaResult<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut schemas = BTreeMap::new();
        for (config_type, document) in documents {
            if schemas.contains_key(&config_type) {
                return Err(SchemaError::DuplicateType(config_type));
            }
            let compiled = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&document)
                .map_err(|e| SchemaError::InvalidSchema {
                    config_type: config_type.clone(),
                    reason: e.to_string(),
                })?;
            debug!(config_type = %config_type, "registered schema");
            schemas.insert(config_type, RegisteredSchema { document, compiled });
        }
        Ok(Self { schemas })
    }

    /// Registered config types, sorted
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// The raw schema document for a config type
    pub fn schema(&self, config_type: &str) -> Option<&Value> {
        self.schemas.get(config_type).map(|s| &s.document)
    }

    /// Check `payload` against the schema for `config_type`, reporting the first violation.
    pub fn validate(&self, config_type: &str, payload: &Value) -> SchemaResult<()> {
        let schema = self
            .schemas
            .get(config_type)
            .ok_or_else(|| SchemaError::UnknownType(config_type.to_string()))?;

        if let Err(mut errors) = schema.compiled.validate(payload) {
            let violation = match errors.next() {
                Some(err) => {
                    let path = err.instance_path.to_string();
                    let path = if path.is_empty() { "(root)".to_string() } else { path };
                    format!("{path}: {err}")
                }
                None => "validation failed".to_string(),
            };
            return Err(SchemaError::Violation {
                config_type: config_type.to_string(),
                violation,
            });
        }
        Ok(())
    }
}

impl SchemaValidator for SchemaRegistry {
    fn validate(&self, config_type: &str, payload: &Value) -> SchemaResult<()> {
        SchemaRegistry::validate(self, config_type, payload)
    }

    fn types(&self) -> Vec<String> {
        SchemaRegistry::types(self).map(str::to_string).collect()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("types", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn collect_embedded(dir: &'static Dir<'static>, out: &mut Vec<(String, Value)>) -> SchemaResult<()> {
    for sub in dir.dirs() {
        collect_embedded(sub, out)?;
    }
    for file in dir.files() {
        let Some(file_name) = file.path().file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(SCHEMA_SUFFIX) else {
            continue;
        };
        let Some(content) = file.contents_utf8() else {
            continue;
        };
        let document: Value = serde_json::from_str(content)?;
        // The document title names the type; fall back to the file name
        let config_type = document
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(stem)
            .to_string();
        out.push((config_type, document));
    }
    Ok(())
}
