//! Per-request context.
//!
//! Derived once per inbound request and threaded through selection,
//! forwarding and observability.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, Method, Uri};
use uuid::Uuid;

use crate::config::schema::ServiceConfig;
use crate::service::affinity;
use crate::service::runtime::BackendKey;

/// Everything the forwarder needs to know about one request.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: IpAddr,
    pub method: Method,
    pub uri: Uri,
    pub hostname: String,
    /// Label captured by a wildcard hostname match (`$1`).
    pub wildcard_label: Option<String>,
    pub affinity_key: Option<String>,
    /// The affinity key was minted here and must be set as a cookie on the
    /// response.
    pub cookie_to_set: bool,
    pub region: Option<String>,
    pub backends_tried: HashSet<BackendKey>,
    pub attempt_number: u32,
}

impl RequestContext {
    pub fn derive(
        config: &ServiceConfig,
        hostname: &str,
        wildcard_label: Option<String>,
        headers: &HeaderMap,
        method: Method,
        uri: Uri,
        remote: SocketAddr,
    ) -> Self {
        let obs = &config.observability;
        let request_id = headers
            .get(obs.header_request_id.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let client_ip = client_ip_from(headers, obs.trusted_ip_header.as_deref(), remote);

        let mut cookie_to_set = false;
        let mut affinity_key = affinity::derive_key(&config.session_affinity, headers, client_ip);
        if affinity_key.is_none()
            && config.session_affinity.kind == crate::config::schema::AffinityKind::Cookie
        {
            // First visit: mint the sticky key; the cookie rides back on the
            // response.
            affinity_key = Some(Uuid::new_v4().to_string());
            cookie_to_set = true;
        }

        let region = headers
            .get(obs.region_header.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            request_id,
            client_ip,
            method,
            uri,
            hostname: hostname.to_string(),
            wildcard_label,
            affinity_key,
            cookie_to_set,
            region,
            backends_tried: HashSet::new(),
            attempt_number: 0,
        }
    }
}

/// Client IP from the trusted header when configured, else the socket peer.
pub fn client_ip_from(
    headers: &HeaderMap,
    trusted_header: Option<&str>,
    remote: SocketAddr,
) -> IpAddr {
    if let Some(name) = trusted_header {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            // Take the first hop of a comma-joined chain.
            if let Ok(ip) = value.split(',').next().unwrap_or("").trim().parse() {
                return ip;
            }
        }
    }
    remote.ip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn remote() -> SocketAddr {
        "192.0.2.1:40000".parse().unwrap()
    }

    #[test]
    fn trusted_header_overrides_remote() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.7"));
        let ip = client_ip_from(&headers, Some("x-real-ip"), remote());
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_remote_on_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("not-an-ip"));
        assert_eq!(
            client_ip_from(&headers, Some("x-real-ip"), remote()),
            remote().ip()
        );
        assert_eq!(client_ip_from(&HeaderMap::new(), None, remote()), remote().ip());
    }

    #[test]
    fn derive_reuses_incoming_request_id() {
        let config = ServiceConfig::single_pool("app.example.com", Vec::new());
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-1"));
        let ctx = RequestContext::derive(
            &config,
            "app.example.com",
            None,
            &headers,
            Method::GET,
            Uri::from_static("/"),
            remote(),
        );
        assert_eq!(ctx.request_id, "req-1");

        let ctx = RequestContext::derive(
            &config,
            "app.example.com",
            None,
            &HeaderMap::new(),
            Method::GET,
            Uri::from_static("/"),
            remote(),
        );
        assert_eq!(ctx.request_id.len(), 36);
    }

    #[test]
    fn cookie_affinity_mints_a_key_when_absent() {
        let mut config = ServiceConfig::single_pool("app.example.com", Vec::new());
        config.session_affinity.kind = crate::config::schema::AffinityKind::Cookie;
        let ctx = RequestContext::derive(
            &config,
            "app.example.com",
            None,
            &HeaderMap::new(),
            Method::GET,
            Uri::from_static("/"),
            remote(),
        );
        assert!(ctx.affinity_key.is_some());
        assert!(ctx.cookie_to_set);
    }
}
