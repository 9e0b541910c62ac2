//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request path:
//!     forwarder outcome → metrics.rs (Prometheus counters/histograms)
//!                       → per-backend counters (service::metrics)
//!
//! Health transitions:
//!     HealthTracker → notify.rs (NotificationSink, spawned delivery)
//!                   → metrics.rs backend health gauge
//! ```
//!
//! # Design Decisions
//! - Per-service metrics are owned by the ServiceInstance; the exporter
//!   here only carries fleet-level aggregates
//! - Notification delivery never blocks a health transition

pub mod metrics;
pub mod notify;

pub use notify::{HealthEvent, NoopSink, NotificationSink, WebhookSink};
