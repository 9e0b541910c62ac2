//! Upstream header rewriting.
//!
//! Hop-by-hop headers never cross the proxy; forwarding metadata
//! (`X-Forwarded-*`, request id) is stamped per config, and the Host header
//! follows the service's host-header policy.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::config::schema::{HostHeaderPolicy, ObservabilityConfig, XffMode};
use crate::proxy::context::RequestContext;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header must not be forwarded.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

/// Build the header map for one upstream attempt.
pub fn build_upstream_headers(
    original: &HeaderMap,
    obs: &ObservabilityConfig,
    host_policy: &HostHeaderPolicy,
    backend_url: &Url,
    ctx: &RequestContext,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(original.len() + 5);
    for (name, value) in original {
        if is_hop_by_hop(name) || name == "host" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let client_ip = ctx.client_ip.to_string();
    let xff_value = match (obs.xff, original.get("x-forwarded-for")) {
        (XffMode::Append, Some(existing)) => match existing.to_str() {
            Ok(chain) => format!("{chain}, {client_ip}"),
            Err(_) => client_ip.clone(),
        },
        _ => client_ip.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&xff_value) {
        headers.insert("x-forwarded-for", value);
    }

    if !headers.contains_key("x-forwarded-proto") {
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if let Some(host) = original.get("host") {
        headers.insert("x-forwarded-host", host.clone());
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        if let Ok(name) = HeaderName::try_from(obs.header_request_id.as_str()) {
            headers.insert(name, value);
        }
    }

    let host = match host_policy {
        HostHeaderPolicy::Preserve => original
            .get("host")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        HostHeaderPolicy::BackendHostname => backend_url.host_str().map(|h| {
            match backend_url.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            }
        }),
        HostHeaderPolicy::Literal(value) => Some(value.clone()),
    };
    if let Some(host) = host.and_then(|h| HeaderValue::from_str(&h).ok()) {
        headers.insert("host", host);
    }

    headers
}
