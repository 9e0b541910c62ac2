//! Admin API handlers.
//!
//! Every endpoint answers the `{success, data, error, timestamp}` envelope.
//! Config mutations clone the current tree, edit it, and go through
//! `ServiceInstance::apply_config`, so validation, persistence and affinity
//! eviction behave identically for full PUTs and single-backend tweaks.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::admin::{envelope, AdminState};
use crate::config::schema::{unknown_top_level_keys, BackendConfig, ServiceConfig};
use crate::service::instance::{ApplyError, ServiceInstance};
use crate::service::runtime::BackendRuntime;

fn not_found() -> Response {
    envelope::error_response(StatusCode::NOT_FOUND, "not_found")
}

fn apply_error(e: &ApplyError) -> Response {
    envelope::error_detail(StatusCode::BAD_REQUEST, "bad_request", &e.to_string())
}

fn rfc3339(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|d| d.to_rfc3339())
        .unwrap_or_default()
}

fn warn_unknown_keys(instance: &ServiceInstance, raw: &Value) {
    let unknown = unknown_top_level_keys(raw);
    if !unknown.is_empty() {
        tracing::warn!(
            hostname = %instance.hostname(),
            keys = ?unknown,
            "ignoring unknown config fields"
        );
        instance.metrics().warn_unknown_fields(unknown.len() as u64);
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Restrict the listing to one hostname.
    pub service: Option<String>,
}

/// GET /list
pub async fn list_services(
    State(state): State<AdminState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let mut services: Vec<Value> = state
        .router
        .list()
        .iter()
        .filter(|instance| {
            query
                .service
                .as_deref()
                .map_or(true, |wanted| instance.hostname().eq_ignore_ascii_case(wanted))
        })
        .map(|instance| summary(instance))
        .collect();
    services.sort_by(|a, b| {
        a["hostname"]
            .as_str()
            .unwrap_or("")
            .cmp(b["hostname"].as_str().unwrap_or(""))
    });
    envelope::ok(services)
}

fn summary(instance: &ServiceInstance) -> Value {
    let snapshot = instance.snapshot();
    let active = snapshot.config.active_hc.enabled;
    let total = snapshot.all_backends().count();
    let healthy = snapshot
        .all_backends()
        .filter(|b| b.effective_healthy(active))
        .count();
    json!({
        "hostname": snapshot.config.hostname,
        "pools": snapshot.pools.len(),
        "backends": total,
        "healthy_backends": healthy,
        "sessions": instance.affinity().len(),
        "started_at": rfc3339(instance.metrics().started_at_ms()),
        "last_config_change_at": rfc3339(instance.metrics().last_config_change_ms()),
    })
}

/// GET /services/{host}/config
pub async fn get_config(State(state): State<AdminState>, Path(host): Path<String>) -> Response {
    match state.router.get(&host) {
        Some(instance) => envelope::ok(&*instance.snapshot().config),
        None => not_found(),
    }
}

/// PUT /services/{host}/config — full replace; creates the service if new.
pub async fn put_config(
    State(state): State<AdminState>,
    Path(host): Path<String>,
    Json(mut raw): Json<Value>,
) -> Response {
    if let Some(map) = raw.as_object_mut() {
        map.insert("hostname".to_string(), json!(host));
    }
    let config: ServiceConfig = match serde_json::from_value(raw.clone()) {
        Ok(config) => config,
        Err(e) => {
            return envelope::error_detail(StatusCode::BAD_REQUEST, "bad_request", &e.to_string())
        }
    };
    match state.router.upsert(config).await {
        Ok(instance) => {
            warn_unknown_keys(&instance, &raw);
            envelope::ok(json!({ "hostname": instance.hostname() }))
        }
        Err(e) => apply_error(&e),
    }
}

/// PATCH /services/{host}/config — merge at top-level keys only.
pub async fn patch_config(
    State(state): State<AdminState>,
    Path(host): Path<String>,
    Json(patch): Json<Value>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let Some(patch_map) = patch.as_object() else {
        return envelope::error_detail(StatusCode::BAD_REQUEST, "bad_request", "expected object");
    };

    let mut merged = match serde_json::to_value(&*instance.snapshot().config) {
        Ok(Value::Object(map)) => map,
        _ => return envelope::error_response(StatusCode::BAD_REQUEST, "bad_request"),
    };
    for (key, value) in patch_map {
        merged.insert(key.clone(), value.clone());
    }
    merged.insert("hostname".to_string(), json!(host));
    let merged = Value::Object(merged);
    warn_unknown_keys(&instance, &merged);

    let config: ServiceConfig = match serde_json::from_value(merged) {
        Ok(config) => config,
        Err(e) => {
            return envelope::error_detail(StatusCode::BAD_REQUEST, "bad_request", &e.to_string())
        }
    };
    match instance.apply_config(config).await {
        Ok(()) => envelope::ok(json!({ "hostname": instance.hostname() })),
        Err(e) => apply_error(&e),
    }
}

/// DELETE /services/{host}/config
pub async fn delete_config(State(state): State<AdminState>, Path(host): Path<String>) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let purge = instance.snapshot().config.purge_metrics_on_delete;
    let final_metrics = (!purge).then(|| metrics_json(&instance));
    state.router.remove(&host).await;
    envelope::ok(json!({ "deleted": host, "final_metrics": final_metrics }))
}

fn default_pool_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AddBackendBody {
    #[serde(default = "default_pool_id")]
    pub pool: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

/// POST /services/{host}/backends
pub async fn add_backend(
    State(state): State<AdminState>,
    Path(host): Path<String>,
    Json(body): Json<AddBackendBody>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let mut config = (*instance.snapshot().config).clone();
    let Some(pool) = config.pools.iter_mut().find(|p| p.id == body.pool) else {
        return envelope::error_detail(
            StatusCode::BAD_REQUEST,
            "bad_request",
            &format!("unknown pool '{}'", body.pool),
        );
    };
    let backend_id = body.backend.id.clone();
    pool.backends.push(body.backend);
    match instance.apply_config(config).await {
        Ok(()) => envelope::ok(json!({ "added": backend_id })),
        Err(e) => apply_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PoolQuery {
    pub pool: Option<String>,
}

fn find_backend_slot<'a>(
    config: &'a mut ServiceConfig,
    id: &str,
    pool: Option<&str>,
) -> Option<(usize, usize)> {
    for (pool_index, pool_config) in config.pools.iter().enumerate() {
        if pool.is_some_and(|p| p != pool_config.id) {
            continue;
        }
        if let Some(backend_index) = pool_config.backends.iter().position(|b| b.id == id) {
            return Some((pool_index, backend_index));
        }
    }
    None
}

/// PUT /services/{host}/backends/{id}
pub async fn update_backend(
    State(state): State<AdminState>,
    Path((host, id)): Path<(String, String)>,
    Query(query): Query<PoolQuery>,
    Json(mut backend): Json<BackendConfig>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let mut config = (*instance.snapshot().config).clone();
    let Some((pool_index, backend_index)) =
        find_backend_slot(&mut config, &id, query.pool.as_deref())
    else {
        return not_found();
    };
    backend.id = id.clone();
    config.pools[pool_index].backends[backend_index] = backend;
    match instance.apply_config(config).await {
        Ok(()) => envelope::ok(json!({ "updated": id })),
        Err(e) => apply_error(&e),
    }
}

/// DELETE /services/{host}/backends/{id}
pub async fn remove_backend(
    State(state): State<AdminState>,
    Path((host, id)): Path<(String, String)>,
    Query(query): Query<PoolQuery>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let mut config = (*instance.snapshot().config).clone();
    let Some((pool_index, backend_index)) =
        find_backend_slot(&mut config, &id, query.pool.as_deref())
    else {
        return not_found();
    };
    config.pools[pool_index].backends.remove(backend_index);
    match instance.apply_config(config).await {
        Ok(()) => envelope::ok(json!({ "removed": id })),
        Err(e) => apply_error(&e),
    }
}

async fn set_backend_enabled(
    state: &AdminState,
    host: &str,
    id: &str,
    pool: Option<&str>,
    enabled: bool,
) -> Response {
    let Some(instance) = state.router.get(host) else {
        return not_found();
    };
    let mut config = (*instance.snapshot().config).clone();
    let Some((pool_index, backend_index)) = find_backend_slot(&mut config, id, pool) else {
        return not_found();
    };
    config.pools[pool_index].backends[backend_index].enabled = enabled;
    match instance.apply_config(config).await {
        Ok(()) => envelope::ok(json!({ "backend": id, "enabled": enabled })),
        Err(e) => apply_error(&e),
    }
}

/// POST /services/{host}/backends/{id}/enable
pub async fn enable_backend(
    State(state): State<AdminState>,
    Path((host, id)): Path<(String, String)>,
    Query(query): Query<PoolQuery>,
) -> Response {
    set_backend_enabled(&state, &host, &id, query.pool.as_deref(), true).await
}

/// POST /services/{host}/backends/{id}/disable
pub async fn disable_backend(
    State(state): State<AdminState>,
    Path((host, id)): Path<(String, String)>,
    Query(query): Query<PoolQuery>,
) -> Response {
    set_backend_enabled(&state, &host, &id, query.pool.as_deref(), false).await
}

/// POST /services/{host}/backends/{id}/health/reset
pub async fn reset_backend_health(
    State(state): State<AdminState>,
    Path((host, id)): Path<(String, String)>,
    Query(query): Query<PoolQuery>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let snapshot = instance.snapshot();
    let backend = snapshot.pools.iter().find_map(|pool| {
        if query.pool.as_deref().is_some_and(|p| p != pool.config.id) {
            return None;
        }
        pool.backends.iter().find(|b| b.config.id == id)
    });
    let Some(backend) = backend else {
        return not_found();
    };
    backend.state.health.reset();
    backend.state.breaker.reset();
    backend.state.metrics.reset();
    envelope::ok(backend_json(backend, snapshot.config.active_hc.enabled))
}

/// POST /services/{host}/health/check — force-run active probes.
pub async fn force_health_check(
    State(state): State<AdminState>,
    Path(host): Path<String>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    instance.run_active_probes(true).await;
    let snapshot = instance.snapshot();
    let backends: Vec<Value> = snapshot
        .all_backends()
        .map(|b| backend_json(b, snapshot.config.active_hc.enabled))
        .collect();
    envelope::ok(json!({ "hostname": instance.hostname(), "backends": backends }))
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

/// GET /services/{host}/metrics
pub async fn service_metrics(
    State(state): State<AdminState>,
    Path(host): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    if query.format.as_deref() == Some("html") {
        return Html(metrics_html(&instance)).into_response();
    }
    envelope::ok(metrics_json(&instance))
}

/// GET /services/{host}/sessions
pub async fn get_sessions(State(state): State<AdminState>, Path(host): Path<String>) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let snapshot = instance.snapshot();
    envelope::ok(json!({
        "count": instance.affinity().len(),
        "kind": snapshot.config.session_affinity.kind,
        "ttl_secs": snapshot.config.session_affinity.ttl_secs,
    }))
}

/// DELETE /services/{host}/sessions
pub async fn clear_sessions(State(state): State<AdminState>, Path(host): Path<String>) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    let cleared = instance.affinity().len();
    instance.affinity().clear();
    envelope::ok(json!({ "cleared": cleared }))
}

/// GET /__lb_metrics__/{host} — raw metrics, `?format=html` negotiable.
pub async fn metrics_surface(
    State(state): State<AdminState>,
    Path(host): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    if query.format.as_deref() == Some("html") {
        return Html(metrics_html(&instance)).into_response();
    }
    Json(metrics_json(&instance)).into_response()
}

/// GET /__lb_metrics__/{host}/json
pub async fn metrics_surface_json(
    State(state): State<AdminState>,
    Path(host): Path<String>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    Json(metrics_json(&instance)).into_response()
}

/// GET /__lb_metrics__/{host}/html
pub async fn metrics_surface_html(
    State(state): State<AdminState>,
    Path(host): Path<String>,
) -> Response {
    let Some(instance) = state.router.get(&host) else {
        return not_found();
    };
    Html(metrics_html(&instance)).into_response()
}

pub(crate) fn backend_json(backend: &Arc<BackendRuntime>, active_hc: bool) -> Value {
    let health = backend.state.health.snapshot();
    let metrics = backend.state.metrics.snapshot();
    json!({
        "pool": backend.pool_id,
        "id": backend.config.id,
        "url": backend.config.url.as_str(),
        "weight": backend.config.weight,
        "priority": backend.config.priority,
        "enabled": backend.config.enabled,
        "region": backend.config.region,
        "healthy": backend.effective_healthy(active_hc),
        "cb_state": backend.state.breaker.state(),
        "cb_opened_at": backend.state.breaker.opened_at_ms().map(rfc3339),
        "inflight": backend.inflight(),
        "consecutive_failures": health.consecutive_failures,
        "consecutive_successes": health.consecutive_successes,
        "last_failure_at": health.last_failure_ms.map(rfc3339),
        "requests": metrics.requests,
        "successes": metrics.successes,
        "failures": metrics.failures,
        "avg_rt_ms": metrics.avg_rt_ms,
        "last_failures": metrics.last_failures,
    })
}

/// Metrics document shared by the admin endpoint and the metrics surface.
pub(crate) fn metrics_json(instance: &ServiceInstance) -> Value {
    let snapshot = instance.snapshot();
    let active = snapshot.config.active_hc.enabled;

    let mut total_requests = 0u64;
    let mut total_successes = 0u64;
    let mut total_failures = 0u64;
    let mut total_rt_weighted = 0f64;
    let backends: Vec<Value> = snapshot
        .all_backends()
        .map(|b| {
            let m = b.state.metrics.snapshot();
            total_requests += m.requests;
            total_successes += m.successes;
            total_failures += m.failures;
            total_rt_weighted += m.avg_rt_ms * m.requests as f64;
            backend_json(b, active)
        })
        .collect();

    json!({
        "service": snapshot.config.hostname,
        "started_at": rfc3339(instance.metrics().started_at_ms()),
        "last_config_change_at": rfc3339(instance.metrics().last_config_change_ms()),
        "unknown_config_fields": instance.metrics().unknown_config_fields(),
        "sessions": instance.affinity().len(),
        "backends": backends,
        "totals": {
            "requests": total_requests,
            "successes": total_successes,
            "failures": total_failures,
            "avg_rt_ms": if total_requests > 0 {
                total_rt_weighted / total_requests as f64
            } else {
                0.0
            },
        },
    })
}

pub(crate) fn metrics_html(instance: &ServiceInstance) -> String {
    let snapshot = instance.snapshot();
    let active = snapshot.config.active_hc.enabled;
    let mut rows = String::new();
    for backend in snapshot.all_backends() {
        let m = backend.state.metrics.snapshot();
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.1}</td></tr>",
            backend.pool_id,
            backend.config.id,
            if backend.effective_healthy(active) { "healthy" } else { "unhealthy" },
            m.requests,
            m.successes,
            m.failures,
            m.avg_rt_ms,
        ));
    }
    format!(
        "<!doctype html><html><head><title>{host} metrics</title></head><body>\
         <h1>{host}</h1><table border=\"1\">\
         <tr><th>pool</th><th>backend</th><th>health</th><th>requests</th>\
         <th>successes</th><th>failures</th><th>avg rt (ms)</th></tr>\
         {rows}</table></body></html>",
        host = instance.hostname(),
    )
}
