//! Remote Config
//!
//! A versioned, append-only store for named, typed configuration documents.
//!
//! ## Features
//!
//! - **Immutable History**: Every change is a new version; nothing is overwritten
//! - **Schema Validation**: Writes are checked against the JSON Schema of the config's type
//! - **Type Lineage**: A config's type is fixed at version 1 and inherited by every later version
//! - **Rollback**: Replays an old payload as a new version; the counter only grows
//! - **Concurrent Writers**: Version allocation is a single transaction per append
//!
//! ## Architecture
//!
//! ```text
//! ConfigService ──validate──▶ SchemaRegistry   (immutable, built once)
//!      │
//!      └──allocate/read──▶ VersionStore        (SQLite, append-only `configs` table)
//!
//! configs
//! ├── (qris, feature_toggle, 1, {"enabled":true})
//! ├── (qris, feature_toggle, 2, {"enabled":false})
//! └── (qris, feature_toggle, 3, {"enabled":true})   <- rollback to 1
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod service;
pub mod store;

pub use cancel::{CancelToken, Interrupted};
pub use config::{AppConfig, LoggingConfig, StoreConfig};
pub use error::{
    ErrorKind, SchemaError, SchemaResult, ServiceError, ServiceResult, StoreError, StoreResult,
};
pub use model::ConfigVersion;
pub use registry::{SchemaRegistry, SchemaValidator};
pub use service::{parse_payload, ConfigService};
pub use store::{SqliteVersionStore, VersionStore};
