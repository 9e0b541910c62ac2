//! Backend selection subsystem.
//!
//! # Data Flow
//! ```text
//! Request context (client ip, region, affinity key, backends already tried)
//!     → selector.rs (walk pools in order, build candidate set)
//!     → session affinity resolution (sticky hit short-circuits)
//!     → steering algorithm:
//!         - round_robin.rs   (monotonic cursor)
//!         - weighted.rs      (smooth weighted round-robin)
//!         - least_conn.rs    (fewest inflight connections)
//!         - ip_hash.rs       (stable weighted bucket per client ip)
//!         - random.rs        (weighted random)
//!         - geographic.rs    (region filter, round-robin fallback)
//!     → circuit-breaker admission on the picked backend
//!     → Some(backend) or None (no eligible candidate anywhere)
//! ```

pub mod geographic;
pub mod ip_hash;
pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod selector;
pub mod weighted;

use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;

use crate::service::runtime::{BackendRuntime, PoolState};

pub use selector::{select, Selection};

/// Inputs a steering algorithm may consult.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub client_ip: IpAddr,
    pub region: Option<&'a str>,
}

/// Interface for steering algorithms.
///
/// `candidates` is the already-filtered candidate set (enabled, effectively
/// healthy, circuit not rejecting, not yet tried), in pool order.
pub trait SteeringAlgorithm: Send + Sync + Debug {
    fn pick(
        &self,
        pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>>;
}
