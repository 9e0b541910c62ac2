//! Request forwarding: the retry/failover state machine.
//!
//! One loop per request: pick a backend (excluding ones already tried),
//! rewrite headers, send with a per-attempt timeout, classify the outcome,
//! then either stream the response back or back off and fail over. Bodies
//! up to the replay cap are buffered so retries can resend them; larger
//! bodies stream through with retries disabled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, Request, Response, StatusCode};
use bytes::Bytes;

use crate::clock::Clock;
use crate::config::schema::{AffinityKind, ServiceConfig};
use crate::health::passive::HealthTracker;
use crate::load_balancer::{self, SelectionContext};
use crate::observability::metrics;
use crate::proxy::context::RequestContext;
use crate::proxy::headers::{build_upstream_headers, is_hop_by_hop};
use crate::proxy::HttpClient;
use crate::resilience::backoff;
use crate::resilience::retries::{self, FailureKind};
use crate::routing::hostname::expand_backrefs;
use crate::service::affinity::SessionAffinityTable;
use crate::service::runtime::{BackendRuntime, ServiceSnapshot};

enum RequestBody {
    /// Buffered; every attempt gets a cheap clone.
    Replayable(Bytes),
    /// Streams through once; taken by the single allowed attempt.
    Streaming(Option<Body>),
}

/// Drive the retry loop for one proxied request.
pub async fn forward(
    client: &HttpClient,
    snapshot: &ServiceSnapshot,
    affinity: &SessionAffinityTable,
    tracker: &HealthTracker,
    clock: &Arc<dyn Clock>,
    mut ctx: RequestContext,
    headers: HeaderMap,
    body: Body,
) -> Response<Body> {
    let config = &snapshot.config;
    let policy = &config.retry_policy;
    let obs = &config.observability;
    let start = Instant::now();

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    // Bodyless methods without a declared length buffer trivially; payload
    // methods without one must stream (chunked uploads are not replayable).
    let replayable = match content_length {
        Some(len) => len <= policy.max_replay_body_bytes,
        None => !matches!(ctx.method, Method::POST | Method::PUT | Method::PATCH),
    };
    let mut request_body = if replayable {
        match to_bytes(body, policy.max_replay_body_bytes).await {
            Ok(bytes) => RequestBody::Replayable(bytes),
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "bad_request", &ctx, obs);
            }
        }
    } else {
        RequestBody::Streaming(Some(body))
    };

    let max_attempts = match request_body {
        RequestBody::Replayable(_) => policy.max_retries.saturating_add(1),
        RequestBody::Streaming(_) => 1,
    };
    let overall_deadline = Duration::from_millis(policy.overall_deadline_ms);
    let mut last_failure: Option<FailureKind> = None;

    while ctx.attempt_number < max_attempts {
        if ctx.attempt_number > 0 && start.elapsed() >= overall_deadline {
            break;
        }

        let selection_ctx = SelectionContext {
            client_ip: ctx.client_ip,
            region: ctx.region.as_deref(),
        };
        let Some(selection) = load_balancer::select(
            snapshot,
            affinity,
            &selection_ctx,
            ctx.affinity_key.as_deref(),
            &ctx.backends_tried,
            clock.now(),
            clock.epoch_millis(),
        ) else {
            break;
        };
        let backend = selection.backend;
        ctx.attempt_number += 1;

        let upstream_uri = match upstream_uri(&backend, ctx.wildcard_label.as_deref(), &ctx) {
            Some(uri) => uri,
            None => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    backend = %backend.config.id,
                    "upstream url could not be built, skipping backend"
                );
                ctx.backends_tried.insert(backend.key());
                last_failure = Some(FailureKind::Connect);
                continue;
            }
        };

        let attempt_body = match &mut request_body {
            RequestBody::Replayable(bytes) => Body::from(bytes.clone()),
            RequestBody::Streaming(slot) => match slot.take() {
                Some(body) => body,
                None => break,
            },
        };

        let mut builder = Request::builder()
            .method(ctx.method.clone())
            .uri(upstream_uri);
        if let Some(h) = builder.headers_mut() {
            *h = build_upstream_headers(
                &headers,
                obs,
                &config.host_header_policy,
                &backend.config.url,
                &ctx,
            );
        }
        let upstream_request = match builder.body(attempt_body) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "failed to build upstream request");
                ctx.backends_tried.insert(backend.key());
                last_failure = Some(FailureKind::Connect);
                continue;
            }
        };

        let mut guard = backend.inflight_guard();
        if selection.breaker_trial {
            guard.arm_trial();
        }

        let remaining = overall_deadline.saturating_sub(start.elapsed());
        let attempt_timeout = Duration::from_millis(policy.attempt_timeout_ms).min(remaining);
        let attempt_start = Instant::now();
        let result = tokio::time::timeout(attempt_timeout, client.request(upstream_request)).await;
        let rt_ms = attempt_start.elapsed().as_millis() as u64;

        let failure = match result {
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                if !retries::status_is_retryable(policy, status) {
                    tracker.record_success(&backend, config, rt_ms);
                    guard.disarm_trial();
                    drop(guard);

                    if let Some(key) = &ctx.affinity_key {
                        if config.session_affinity.kind != AffinityKind::None
                            && !selection.from_affinity
                        {
                            affinity.bind(
                                key,
                                &backend.pool_id,
                                &backend.config.id,
                                clock.epoch_millis(),
                                config.session_affinity.ttl_secs.saturating_mul(1000),
                            );
                        }
                    }

                    metrics::record_request(
                        &ctx.hostname,
                        &backend.config.id,
                        ctx.method.as_str(),
                        status,
                        start,
                    );
                    return success_response(response, &ctx, &backend, config);
                }
                FailureKind::Status(status)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    backend = %backend.config.id,
                    attempt = ctx.attempt_number,
                    error = %e,
                    "upstream attempt failed"
                );
                if e.is_connect() {
                    FailureKind::Connect
                } else {
                    FailureKind::Transport
                }
            }
            Err(_) => FailureKind::Timeout,
        };

        tracker.record_failure(&backend, config, rt_ms, failure);
        guard.disarm_trial();
        drop(guard);
        ctx.backends_tried.insert(backend.key());
        last_failure = Some(failure);

        let retry_allowed = ctx.attempt_number < max_attempts
            && start.elapsed() < overall_deadline
            && retries::may_retry(policy, &ctx.method, failure);
        if !retry_allowed {
            break;
        }
        metrics::record_retry(&ctx.hostname);
        tracing::info!(
            request_id = %ctx.request_id,
            attempt = ctx.attempt_number,
            reason = %failure.reason(),
            "retrying on another backend"
        );
        tokio::time::sleep(backoff::delay_for(&policy.backoff, ctx.attempt_number)).await;
    }

    let (status, code) = match last_failure {
        None => (StatusCode::BAD_GATEWAY, "no_backend_available"),
        Some(FailureKind::Timeout) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
        Some(FailureKind::Connect) | Some(FailureKind::Transport) => {
            (StatusCode::BAD_GATEWAY, "no_backend_available")
        }
        Some(FailureKind::Status(_)) => (StatusCode::SERVICE_UNAVAILABLE, "all_backends_failed"),
    };
    metrics::record_request(
        &ctx.hostname,
        "none",
        ctx.method.as_str(),
        status.as_u16(),
        start,
    );
    error_response(status, code, &ctx, obs)
}

/// Scheme and authority from the backend URL (with `$1` expanded), path and
/// query from the client request, the backend's own path as prefix.
fn upstream_uri(
    backend: &BackendRuntime,
    label: Option<&str>,
    ctx: &RequestContext,
) -> Option<axum::http::Uri> {
    let expanded = expand_backrefs(backend.config.url.as_str(), label);
    let base: url::Url = expanded.parse().ok()?;

    let host = base.host_str()?;
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let prefix = base.path().trim_end_matches('/');
    let path_and_query = ctx
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}{}", base.scheme(), authority, prefix, path_and_query)
        .parse()
        .ok()
}

fn success_response(
    response: Response<hyper::body::Incoming>,
    ctx: &RequestContext,
    backend: &BackendRuntime,
    config: &ServiceConfig,
) -> Response<Body> {
    let (mut parts, body) = response.into_parts();

    let dropped: Vec<HeaderName> = parts
        .headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in dropped {
        parts.headers.remove(&name);
    }

    stamp_observability(&mut parts.headers, ctx, Some(&backend.config.id), config);

    if ctx.cookie_to_set && config.session_affinity.kind == AffinityKind::Cookie {
        if let Some(key) = &ctx.affinity_key {
            let cookie_cfg = &config.session_affinity.cookie;
            let mut cookie = format!(
                "{}={}; Path=/; Max-Age={}; SameSite={}",
                cookie_cfg.name,
                key,
                config.session_affinity.ttl_secs,
                cookie_cfg.same_site.as_str()
            );
            if cookie_cfg.secure {
                cookie.push_str("; Secure");
            }
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                parts.headers.append("set-cookie", value);
            }
        }
    }

    Response::from_parts(parts, Body::new(body))
}

fn stamp_observability(
    headers: &mut HeaderMap,
    ctx: &RequestContext,
    backend_id: Option<&str>,
    config: &ServiceConfig,
) {
    let obs = &config.observability;
    if let Some(backend_id) = backend_id {
        insert_named(headers, &obs.header_backend_used, backend_id);
    }
    insert_named(headers, &obs.header_attempts, &ctx.attempt_number.to_string());
    insert_named(headers, &obs.header_request_id, &ctx.request_id);
}

fn insert_named(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
        headers.insert(name, value);
    }
}

pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    ctx: &RequestContext,
    obs: &crate::config::schema::ObservabilityConfig,
) -> Response<Body> {
    let mut response = Response::new(Body::from(format!(
        "{code}: request {}\n",
        ctx.request_id
    )));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    insert_named(
        response.headers_mut(),
        &obs.header_attempts,
        &ctx.attempt_number.to_string(),
    );
    insert_named(response.headers_mut(), &obs.header_request_id, &ctx.request_id);
    response
}
