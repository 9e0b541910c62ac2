//! Per-hostname state container.
//!
//! One `ServiceInstance` exists per configured hostname. Reads are
//! lock-free via an `ArcSwap` snapshot pointer; mutations (config applies,
//! probe batches) serialise on the write lane. Once `apply_config` returns,
//! every subsequent `handle` observes the new config; requests already in
//! flight finish against the snapshot they started with.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::schema::ServiceConfig;
use crate::config::store::ConfigStore;
use crate::config::validation::{validate_service_config, ValidationError};
use crate::health::active::ActiveProber;
use crate::health::passive::HealthTracker;
use crate::load_balancer::{self, SelectionContext};
use crate::observability::notify::NotificationSink;
use crate::proxy::context::RequestContext;
use crate::proxy::forward;
use crate::proxy::websocket;
use crate::proxy::HttpClient;
use crate::routing::hostname::expand_backrefs;
use crate::service::affinity::SessionAffinityTable;
use crate::service::metrics::ServiceMetrics;
use crate::service::runtime::ServiceSnapshot;

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.0.clone())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure applying a config to a live service.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("invalid config: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// Single-writer container for one hostname.
pub struct ServiceInstance {
    hostname: String,
    snapshot: ArcSwap<ServiceSnapshot>,
    write_lane: Mutex<()>,
    affinity: Arc<SessionAffinityTable>,
    metrics: Arc<ServiceMetrics>,
    tracker: HealthTracker,
    prober: ActiveProber,
    client: HttpClient,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ConfigStore>,
    probe_due_at: StdMutex<Instant>,
    probe_in_flight: AtomicBool,
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl ServiceInstance {
    /// Build an instance from a normalized, validated config.
    pub fn new(
        config: ServiceConfig,
        client: HttpClient,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ConfigStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let hostname = config.hostname.clone();
        let interval = Duration::from_secs(config.active_hc.interval_secs);
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(ServiceSnapshot::build(config, None)),
            write_lane: Mutex::new(()),
            affinity: Arc::new(SessionAffinityTable::new()),
            metrics: Arc::new(ServiceMetrics::new(clock.epoch_millis())),
            tracker: HealthTracker::new(hostname.clone(), Arc::clone(&clock), notifier),
            prober: ActiveProber::new(client.clone()),
            client,
            probe_due_at: StdMutex::new(clock.now() + interval),
            probe_in_flight: AtomicBool::new(false),
            clock,
            store,
            hostname,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Immutable view of the current config and runtime state, O(1).
    pub fn snapshot(&self) -> Arc<ServiceSnapshot> {
        self.snapshot.load_full()
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub fn affinity(&self) -> &SessionAffinityTable {
        &self.affinity
    }

    pub fn health_tracker(&self) -> &HealthTracker {
        &self.tracker
    }

    /// Replace the service config (copy-on-write, atomic swap).
    ///
    /// Runtime state (health, breakers, counters) carries over for backends
    /// that survive; bindings to removed or disabled backends are evicted.
    /// Persistence is best-effort: a store failure is logged, not surfaced,
    /// since the new config is already live.
    pub async fn apply_config(&self, mut new_config: ServiceConfig) -> Result<(), ApplyError> {
        new_config.hostname = self.hostname.clone();
        new_config.normalize();
        validate_service_config(&new_config).map_err(ApplyError::Validation)?;

        let _lane = self.write_lane.lock().await;
        let previous = self.snapshot.load_full();
        let next = ServiceSnapshot::build(new_config, Some(&previous));

        for backend in previous.all_backends() {
            let still_usable = next
                .find_backend(&backend.pool_id, &backend.config.id)
                .is_some_and(|b| b.config.enabled);
            if !still_usable {
                self.affinity
                    .remove_backend(&backend.pool_id, &backend.config.id);
            }
        }

        let serialized = serde_json::to_string(&*next.config).ok();
        self.snapshot.store(Arc::new(next));
        self.metrics.config_changed(self.clock.epoch_millis());

        if let Some(blob) = serialized {
            if let Err(e) = self.store.put(&self.hostname, &blob).await {
                tracing::warn!(
                    hostname = %self.hostname,
                    error = %e,
                    "failed to persist config blob"
                );
            }
        }
        tracing::info!(hostname = %self.hostname, "config applied");
        Ok(())
    }

    /// Proxy one request against the current snapshot.
    pub async fn handle(
        self: &Arc<Self>,
        request: Request<Body>,
        remote: SocketAddr,
        wildcard_label: Option<String>,
    ) -> Response<Body> {
        let snapshot = self.snapshot.load_full();
        let (mut parts, body) = request.into_parts();
        let ctx = RequestContext::derive(
            &snapshot.config,
            &self.hostname,
            wildcard_label,
            &parts.headers,
            parts.method.clone(),
            parts.uri.clone(),
            remote,
        );

        if websocket::is_upgrade(&parts.headers) {
            return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(ws) => self.handle_websocket(&snapshot, ws, ctx),
                Err(rejection) => rejection.into_response(),
            };
        }

        forward::forward(
            &self.client,
            &snapshot,
            &self.affinity,
            &self.tracker,
            &self.clock,
            ctx,
            parts.headers,
            body,
        )
        .await
    }

    fn handle_websocket(
        &self,
        snapshot: &ServiceSnapshot,
        ws: WebSocketUpgrade,
        ctx: RequestContext,
    ) -> Response<Body> {
        let selection_ctx = SelectionContext {
            client_ip: ctx.client_ip,
            region: ctx.region.as_deref(),
        };
        let Some(selection) = load_balancer::select(
            snapshot,
            &self.affinity,
            &selection_ctx,
            ctx.affinity_key.as_deref(),
            &ctx.backends_tried,
            self.clock.now(),
            self.clock.epoch_millis(),
        ) else {
            return forward::error_response(
                StatusCode::BAD_GATEWAY,
                "no_backend_available",
                &ctx,
                &snapshot.config.observability,
            );
        };

        let backend = selection.backend;
        let expanded =
            expand_backrefs(backend.config.url.as_str(), ctx.wildcard_label.as_deref());
        let Ok(mut url) = expanded.parse::<url::Url>() else {
            return forward::error_response(
                StatusCode::BAD_GATEWAY,
                "no_backend_available",
                &ctx,
                &snapshot.config.observability,
            );
        };
        url.set_path(ctx.uri.path());
        url.set_query(ctx.uri.query());

        let mut guard = backend.inflight_guard();
        if selection.breaker_trial {
            // Released when the connection ends; an upgrade never records a
            // breaker outcome.
            guard.arm_trial();
        }
        websocket::handle_upgrade(ws, url, ctx.request_id, guard)
    }

    /// Whether the next probe batch is due.
    pub fn probe_due(&self, now: Instant) -> bool {
        self.snapshot.load().config.active_hc.enabled && *self.probe_due_at.lock().unwrap() <= now
    }

    /// Run one probe batch (serialised; a batch still in flight from the
    /// previous deadline is abandoned and its backends taken out of
    /// rotation until a fresh probe succeeds).
    pub async fn run_active_probes(&self, force: bool) {
        let snapshot = self.snapshot.load_full();
        if !snapshot.config.active_hc.enabled && !force {
            return;
        }
        if self.probe_in_flight.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                hostname = %self.hostname,
                "probe batch still in flight at next deadline, abandoning"
            );
            for backend in snapshot.all_backends() {
                if backend.config.enabled && !backend.config.url.as_str().contains("$1") {
                    self.tracker.force_down(backend, "probe_timeout");
                }
            }
            return;
        }

        {
            let _lane = self.write_lane.lock().await;
            self.prober.run_batch(&snapshot, &self.tracker).await;
        }

        let interval = Duration::from_secs(snapshot.config.active_hc.interval_secs);
        *self.probe_due_at.lock().unwrap() = self.clock.now() + interval;
        self.probe_in_flight.store(false, Ordering::Release);
    }

    /// Opportunistic TTL sweep, driven by the scheduler tick.
    pub fn sweep_affinity(&self) {
        self.affinity.sweep(self.clock.epoch_millis());
    }
}
