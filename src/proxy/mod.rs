//! HTTP data plane.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → server.rs (front door: admin / metrics / proxy dispatch)
//!     → context.rs (request id, client ip, affinity key, region)
//!     → [service instance resolves snapshot]
//!     → forward.rs (retry loop: select → rewrite → send → classify)
//!         → headers.rs (hop-by-hop strip, X-Forwarded-*, host policy)
//!         → websocket.rs (bidirectional pipe after 101, no retries)
//!     → response with observability headers
//! ```
//!
//! # Design Decisions
//! - HTTP/1.1 and HTTP/2 via axum/hyper; HTTPS origins via rustls
//! - One shared upstream client for proxying and active probes
//! - No global lock is ever held across an upstream round trip

pub mod context;
pub mod forward;
pub mod headers;
pub mod server;
pub mod websocket;

use axum::body::Body;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Upstream client shared by the forwarder and the active prober.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build the shared upstream client.
pub fn build_http_client() -> HttpClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder(TokioExecutor::new()).build(https)
}
