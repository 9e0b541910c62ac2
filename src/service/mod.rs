//! Per-hostname service state.
//!
//! # Data Flow
//! ```text
//! Router resolves hostname → ServiceInstance (instance.rs)
//!     reads:  lock-free snapshot pointer (runtime.rs)
//!     writes: single write lane (config applies, probe batches)
//!
//! Runtime cells (health, breaker, counters) are keyed by
//! (pool_id, backend_id) and survive config swaps (runtime.rs).
//! Sticky bindings live beside the snapshots (affinity.rs); monotonic
//! counters beside them (metrics.rs).
//! ```

pub mod affinity;
pub mod instance;
pub mod metrics;
pub mod runtime;

pub use affinity::SessionAffinityTable;
pub use instance::{ApplyError, ServiceInstance};
pub use metrics::{BackendMetrics, ServiceMetrics};
pub use runtime::{BackendRuntime, BackendState, PoolState, ServiceSnapshot};
