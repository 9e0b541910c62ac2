//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request Host header
//!     → hostname.rs (case-fold, strip port)
//!     → router.rs   (exact match, else longest-suffix wildcard)
//!     → ServiceInstance.handle
//!
//! Scheduler tick:
//!     router.rs walks instances → due probe batches → health tracker
//! ```

pub mod hostname;
pub mod router;

pub use router::Router;
