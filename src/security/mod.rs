//! Security subsystem.
//!
//! # Design Decisions
//! - The admin/metrics surface is the only rate-limited path; the data
//!   plane is never throttled here
//! - Token buckets are per client IP with configurable refill and burst

pub mod rate_limit;

pub use rate_limit::RateLimiterState;
