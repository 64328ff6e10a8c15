//! Configuration version records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One immutable snapshot of a named configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVersion {
    /// Stable identity of the configuration
    pub name: String,
    /// Schema governing every version of `name`, fixed at version 1
    #[serde(rename = "type")]
    pub config_type: String,
    /// Per-name version number, starting at 1
    pub version: i64,
    /// The payload, validated against `config_type` when it was written
    pub data: serde_json::Value,
    /// Set by storage at insertion
    pub created_at: DateTime<Utc>,
}

impl ConfigVersion {
    /// Weak entity tag identifying this exact `(name, version)` pair.
    ///
    /// Versions are immutable, so the tag never needs the payload itself.
    pub fn etag(&self) -> String {
        let digest = Sha256::digest(format!("{}:{}", self.name, self.version).as_bytes());
        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        format!("W/\"{hex}\"")
    }
}
