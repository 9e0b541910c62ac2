//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! Admin PUT / PATCH body (JSON)
//!     → schema.rs (typed tree, defaults at read time)
//!     → validation.rs (semantic checks)
//!     → ServiceInstance.apply_config (copy-on-write swap)
//!     → store.rs (persist blob per hostname)
//!
//! Boot:
//!     loader.rs (TOML file + env overlay, DEFAULT_BACKENDS seed)
//!     → store rehydration per hostname
//!     → watcher.rs re-applies inline services on file change
//! ```
//!
//! # Design Decisions
//! - A new config fully replaces the old; PATCH merges top-level keys only
//! - Unknown top-level keys are warned about, never rejected
//! - Defaults are applied at read time to avoid storing churn

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{BootConfig, BootError};
pub use schema::ServiceConfig;
pub use store::{ConfigStore, FileStore, MemoryStore, StoreError};
pub use validation::validate_service_config;
