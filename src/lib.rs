//! Multi-tenant HTTP/HTTPS reverse-proxy load balancer.
//!
//! Each configured public hostname owns a [`service::ServiceInstance`] that
//! forwards requests to one of its origin backends, applying health
//! monitoring, session affinity, retry/failover policies and per-backend
//! metrics, all manageable at runtime through a bearer-authenticated admin
//! API.

pub mod admin;
pub mod clock;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod service;

pub use config::schema::ServiceConfig;
pub use lifecycle::Shutdown;
pub use proxy::server::ProxyServer;
pub use routing::Router;
