//! Candidate filtering, pool walk and session-affinity resolution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::schema::SteeringPolicy;
use crate::load_balancer::geographic::Geographic;
use crate::load_balancer::ip_hash::IpHash;
use crate::load_balancer::least_conn::LeastConnections;
use crate::load_balancer::random::Random;
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::weighted::WeightedRoundRobin;
use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::resilience::circuit_breaker::BreakerState;
use crate::service::affinity::SessionAffinityTable;
use crate::service::runtime::{BackendKey, BackendRuntime, ServiceSnapshot};

/// A picked backend plus bookkeeping the forwarder needs.
#[derive(Debug)]
pub struct Selection {
    pub backend: Arc<BackendRuntime>,
    /// The pick claimed the breaker's single half-open trial slot.
    pub breaker_trial: bool,
    /// The pick came from a sticky affinity hit.
    pub from_affinity: bool,
}

fn algorithm(policy: SteeringPolicy) -> &'static dyn SteeringAlgorithm {
    match policy {
        SteeringPolicy::RoundRobin => &RoundRobin,
        SteeringPolicy::WeightedRoundRobin => &WeightedRoundRobin,
        SteeringPolicy::LeastConnections => &LeastConnections,
        SteeringPolicy::IpHash => &IpHash,
        SteeringPolicy::Random => &Random,
        SteeringPolicy::Geographic => &Geographic,
    }
}

/// Pick a backend for one attempt.
///
/// Walks pools in order; within a pool the candidate set is
/// `enabled ∧ effectively healthy ∧ breaker admits ∧ not yet tried`,
/// restricted to the most preferred priority tier. A resolvable sticky
/// binding short-circuits the walk; a binding whose backend is disabled or
/// gone is purged on read, and one that is merely ineligible right now
/// falls back to fresh selection.
pub fn select(
    snapshot: &ServiceSnapshot,
    affinity: &SessionAffinityTable,
    ctx: &SelectionContext<'_>,
    affinity_key: Option<&str>,
    excluded: &HashSet<BackendKey>,
    now: Instant,
    now_ms: u64,
) -> Option<Selection> {
    let config = &snapshot.config;
    let active_hc = config.active_hc.enabled;
    let cb_cfg = &config.passive_hc.circuit_breaker;

    if let Some(key) = affinity_key {
        let ttl_ms = config.session_affinity.ttl_secs.saturating_mul(1000);
        if let Some((pool_id, backend_id)) = affinity.lookup(key, now_ms, ttl_ms) {
            match snapshot.find_backend(&pool_id, &backend_id) {
                None => affinity.remove(key),
                Some(backend) if !backend.config.enabled => affinity.remove(key),
                Some(backend) => {
                    let pool_enabled = snapshot
                        .pools
                        .iter()
                        .find(|p| p.config.id == pool_id)
                        .is_some_and(|p| p.config.enabled);
                    let eligible = pool_enabled
                        && !excluded.contains(&backend.key())
                        && backend.effective_healthy(active_hc)
                        && backend.state.breaker.is_selectable(now, cb_cfg);
                    if eligible {
                        let (admitted, _) = backend.state.breaker.try_acquire(now, cb_cfg);
                        if admitted {
                            return Some(Selection {
                                breaker_trial: backend.state.breaker.state()
                                    == BreakerState::HalfOpen,
                                backend: Arc::clone(backend),
                                from_affinity: true,
                            });
                        }
                    }
                }
            }
        }
    }

    for pool in &snapshot.pools {
        if !pool.config.enabled {
            continue;
        }
        let mut candidates: Vec<Arc<BackendRuntime>> = pool
            .backends
            .iter()
            .filter(|b| {
                b.config.enabled
                    && b.effective_healthy(active_hc)
                    && b.state.breaker.is_selectable(now, cb_cfg)
                    && !excluded.contains(&b.key())
            })
            .cloned()
            .collect();
        if candidates.len() < pool.config.minimum_origins {
            continue;
        }
        if let Some(preferred) = candidates.iter().map(|b| b.config.priority).min() {
            candidates.retain(|b| b.config.priority == preferred);
        }

        let algo = algorithm(pool.steering);
        // A half-open trial slot can be lost to a concurrent claim; drop the
        // loser from the candidate set and pick again.
        while !candidates.is_empty() {
            let Some(picked) = algo.pick(pool, &candidates, ctx) else {
                break;
            };
            let (admitted, _) = picked.state.breaker.try_acquire(now, cb_cfg);
            if admitted {
                return Some(Selection {
                    breaker_trial: picked.state.breaker.state() == BreakerState::HalfOpen,
                    backend: picked,
                    from_affinity: false,
                });
            }
            candidates.retain(|b| b.config.id != picked.config.id);
        }
    }
    None
}
