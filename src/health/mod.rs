//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active probes (active.rs):
//!     Scheduler tick → probe batch per due service
//!     → outcome into passive.rs tracker
//!
//! Passive signals (passive.rs):
//!     Forwarder attempt outcome → HealthTracker.record_*
//!     → state.rs streak counters → transition?
//!     → resilience::circuit_breaker window → trip?
//!     → NotificationSink on transition
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy with consecutive thresholds
//! ```
//!
//! # Design Decisions
//! - Active and passive signals share the same counters, so they cannot
//!   disagree about a backend's streak
//! - Probe outcomes also feed the circuit breaker (a half-open trial can be
//!   resolved by a probe)
//! - Health state is per-backend, not per-pool

pub mod active;
pub mod passive;
pub mod state;

pub use active::ActiveProber;
pub use passive::HealthTracker;
pub use state::{HealthState, HealthTransition};
