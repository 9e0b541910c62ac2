//! Outcome ingestion: passive signals and probe results.
//!
//! Every attempt outcome funnels through [`HealthTracker`], which updates
//! the per-backend counters, drives streak transitions and feeds the
//! circuit breaker. Transitions fan out to the notification sink without
//! blocking the caller.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::schema::ServiceConfig;
use crate::health::state::HealthTransition;
use crate::observability::metrics;
use crate::observability::notify::{dispatch, HealthEvent, NotificationSink};
use crate::resilience::circuit_breaker::BreakerTransition;
use crate::resilience::retries::FailureKind;
use crate::service::runtime::BackendRuntime;

/// Decides `effective_healthy` inputs for one service's backends.
#[derive(Debug)]
pub struct HealthTracker {
    hostname: String,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
}

impl HealthTracker {
    pub fn new(
        hostname: String,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            hostname,
            clock,
            notifier,
        }
    }

    /// Record a successful proxied attempt.
    pub fn record_success(&self, backend: &BackendRuntime, config: &ServiceConfig, rt_ms: u64) {
        backend.state.metrics.record_success(rt_ms);
        if config.passive_hc.enabled {
            self.apply_success(backend, config);
        }
    }

    /// Record a failed proxied attempt.
    pub fn record_failure(
        &self,
        backend: &BackendRuntime,
        config: &ServiceConfig,
        rt_ms: u64,
        kind: FailureKind,
    ) {
        backend
            .state
            .metrics
            .record_failure(rt_ms, chrono::Utc::now().to_rfc3339(), kind.reason());
        if config.passive_hc.enabled {
            self.apply_failure(backend, config, kind.reason());
        }
    }

    /// Record an active probe success.
    pub fn record_probe_success(&self, backend: &BackendRuntime, config: &ServiceConfig) {
        self.apply_success(backend, config);
    }

    /// Record an active probe failure.
    pub fn record_probe_failure(
        &self,
        backend: &BackendRuntime,
        config: &ServiceConfig,
        reason: String,
    ) {
        self.apply_failure(backend, config, reason);
    }

    fn apply_success(&self, backend: &BackendRuntime, config: &ServiceConfig) {
        let now = self.clock.now();
        if let Some(HealthTransition::Up) = backend
            .state
            .health
            .record_success(config.active_hc.consecutive_up)
        {
            self.emit(backend, true, "recovered".to_string());
        }
        if let Some(BreakerTransition::Closed) = backend
            .state
            .breaker
            .record_success(now, &config.passive_hc.circuit_breaker)
        {
            tracing::info!(
                hostname = %self.hostname,
                backend = %backend.config.id,
                "circuit breaker closed"
            );
            self.emit(backend, true, "circuit_closed".to_string());
        }
    }

    fn apply_failure(&self, backend: &BackendRuntime, config: &ServiceConfig, reason: String) {
        let now = self.clock.now();
        let now_ms = self.clock.epoch_millis();
        if let Some(HealthTransition::Down) = backend
            .state
            .health
            .record_failure(config.active_hc.consecutive_down, now_ms)
        {
            self.emit(backend, false, reason.clone());
        }
        if let Some(BreakerTransition::Opened) = backend.state.breaker.record_failure(
            now,
            now_ms,
            &config.passive_hc.circuit_breaker,
        ) {
            tracing::warn!(
                hostname = %self.hostname,
                backend = %backend.config.id,
                reason = %reason,
                "circuit breaker opened"
            );
            self.emit(backend, false, "circuit_opened".to_string());
        }
    }

    /// Mark a backend down outright (abandoned probe).
    pub fn force_down(&self, backend: &BackendRuntime, reason: &str) {
        if backend
            .state
            .health
            .force_down(self.clock.epoch_millis())
            .is_some()
        {
            self.emit(backend, false, reason.to_string());
        }
    }

    fn emit(&self, backend: &BackendRuntime, healthy: bool, reason: String) {
        tracing::info!(
            hostname = %self.hostname,
            pool = %backend.pool_id,
            backend = %backend.config.id,
            healthy,
            reason = %reason,
            "backend health transition"
        );
        metrics::record_backend_health(&self.hostname, &backend.config.id, healthy);
        dispatch(
            &self.notifier,
            HealthEvent {
                hostname: self.hostname.clone(),
                pool_id: backend.pool_id.clone(),
                backend_id: backend.config.id.clone(),
                healthy,
                reason,
                ts: chrono::Utc::now().to_rfc3339(),
            },
        );
    }
}
