//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt to backend:
//!     → per-attempt timeout and overall deadline (forwarder)
//!     → On failure: retries.rs (classify, decide if another attempt is allowed)
//!     → backoff.rs (delay before the next attempt)
//!     → circuit_breaker.rs (track outcomes, open circuit on sustained failure)
//! ```
//!
//! # Design Decisions
//! - Every upstream call has a deadline
//! - Non-idempotent methods retry only on pre-send connect failures, opt-in
//! - Circuit breakers are per-backend, never global

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerState, BreakerTransition, CircuitBreaker};
pub use retries::FailureKind;
