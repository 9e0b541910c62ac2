//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load boot config → rehydrate services from the store → start
//!     listener, probe scheduler, watchers
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain connections → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
