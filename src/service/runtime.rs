//! Runtime state attached to configured pools and backends.
//!
//! Configuration is immutable per snapshot; the mutable runtime cells
//! (health, breaker, inflight gauge, metrics, steering cursors) live in
//! `Arc`s carried across snapshot swaps by `(pool_id, backend_id)` key, so a
//! config update keeps health history and counters for surviving backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::schema::{BackendConfig, PoolConfig, ServiceConfig, SteeringPolicy};
use crate::health::state::HealthState;
use crate::resilience::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::service::metrics::BackendMetrics;

/// Identity of a backend within a service.
pub type BackendKey = (String, String);

/// Mutable cells for one backend, carried across config swaps.
#[derive(Debug, Default)]
pub struct BackendState {
    pub health: HealthState,
    pub breaker: CircuitBreaker,
    pub inflight: AtomicUsize,
    pub metrics: BackendMetrics,
}

/// A configured backend plus its runtime state, as seen by one snapshot.
#[derive(Debug)]
pub struct BackendRuntime {
    pub pool_id: String,
    pub config: BackendConfig,
    pub state: Arc<BackendState>,
}

impl BackendRuntime {
    pub fn key(&self) -> BackendKey {
        (self.pool_id.clone(), self.config.id.clone())
    }

    /// Admin-enable ∧ circuit not open ∧ (active probes enabled ⇒ healthy
    /// flag). The recovery-window nuance of an open breaker is handled by
    /// the selector via `CircuitBreaker::is_selectable`.
    pub fn effective_healthy(&self, active_hc_enabled: bool) -> bool {
        self.config.enabled
            && self.state.breaker.state() != BreakerState::Open
            && (!active_hc_enabled || self.state.health.is_healthy())
    }

    pub fn inflight(&self) -> usize {
        self.state.inflight.load(Ordering::Relaxed)
    }

    /// RAII inflight accounting; the decrement runs on every exit path.
    pub fn inflight_guard(self: &Arc<Self>) -> InflightGuard {
        self.state.inflight.fetch_add(1, Ordering::Relaxed);
        InflightGuard {
            backend: Arc::clone(self),
            trial_armed: false,
        }
    }
}

/// Guard holding one inflight slot on a backend.
///
/// While armed, dropping the guard also releases a claimed half-open
/// breaker trial (the attempt was cancelled before an outcome landed).
#[derive(Debug)]
pub struct InflightGuard {
    backend: Arc<BackendRuntime>,
    trial_armed: bool,
}

impl InflightGuard {
    pub fn arm_trial(&mut self) {
        self.trial_armed = true;
    }

    pub fn disarm_trial(&mut self) {
        self.trial_armed = false;
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.backend.state.inflight.fetch_sub(1, Ordering::Relaxed);
        if self.trial_armed {
            self.backend.state.breaker.release_trial();
        }
    }
}

/// Per-pool steering cursors, carried across config swaps by pool id.
#[derive(Debug, Default)]
pub struct PoolRuntime {
    /// Monotonic round-robin cursor.
    pub rr_cursor: AtomicUsize,
    /// Smooth-WRR current weights, keyed by backend id.
    pub wrr_current: Mutex<HashMap<String, i64>>,
}

/// One pool of a snapshot: config, effective steering, runtime, backends.
#[derive(Debug)]
pub struct PoolState {
    pub config: PoolConfig,
    pub steering: SteeringPolicy,
    pub runtime: Arc<PoolRuntime>,
    pub backends: Vec<Arc<BackendRuntime>>,
}

/// Immutable view of a service used by the data plane. Swapped atomically
/// on config changes; in-flight requests keep the snapshot they started
/// with.
#[derive(Debug)]
pub struct ServiceSnapshot {
    pub config: Arc<ServiceConfig>,
    pub pools: Vec<Arc<PoolState>>,
}

impl ServiceSnapshot {
    /// Build a snapshot from a normalized config, carrying runtime cells
    /// over from the previous snapshot where keys survive.
    pub fn build(config: ServiceConfig, previous: Option<&ServiceSnapshot>) -> Self {
        let mut carried_backends: HashMap<BackendKey, Arc<BackendState>> = HashMap::new();
        let mut carried_pools: HashMap<String, Arc<PoolRuntime>> = HashMap::new();
        if let Some(previous) = previous {
            for pool in &previous.pools {
                carried_pools.insert(pool.config.id.clone(), Arc::clone(&pool.runtime));
                for backend in &pool.backends {
                    carried_backends.insert(backend.key(), Arc::clone(&backend.state));
                }
            }
        }

        let config = Arc::new(config);
        let pools = config
            .pools
            .iter()
            .map(|pool_config| {
                let runtime = carried_pools
                    .remove(&pool_config.id)
                    .unwrap_or_else(|| Arc::new(PoolRuntime::default()));
                let backends = pool_config
                    .backends
                    .iter()
                    .map(|backend_config| {
                        let key = (pool_config.id.clone(), backend_config.id.clone());
                        let state = carried_backends
                            .remove(&key)
                            .unwrap_or_else(|| Arc::new(BackendState::default()));
                        Arc::new(BackendRuntime {
                            pool_id: pool_config.id.clone(),
                            config: backend_config.clone(),
                            state,
                        })
                    })
                    .collect();
                Arc::new(PoolState {
                    steering: config.steering_for(pool_config),
                    config: pool_config.clone(),
                    runtime,
                    backends,
                })
            })
            .collect();

        Self { config, pools }
    }

    pub fn find_backend(&self, pool_id: &str, backend_id: &str) -> Option<&Arc<BackendRuntime>> {
        self.pools
            .iter()
            .find(|p| p.config.id == pool_id)?
            .backends
            .iter()
            .find(|b| b.config.id == backend_id)
    }

    pub fn all_backends(&self) -> impl Iterator<Item = &Arc<BackendRuntime>> {
        self.pools.iter().flat_map(|p| p.backends.iter())
    }
}
