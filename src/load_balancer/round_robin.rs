//! Round-robin steering.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::service::runtime::{BackendRuntime, PoolState};

/// Rotates through candidates via the pool's monotonic cursor.
///
/// The cursor advances with a single atomic add, so concurrent picks never
/// land on the same index unless only one candidate exists.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl SteeringAlgorithm for RoundRobin {
    fn pick(
        &self,
        pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>> {
        if candidates.is_empty() {
            return None;
        }
        let cursor = pool.runtime.rr_cursor.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&candidates[cursor % candidates.len()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::selector::tests_support::{ctx, pool_with};

    #[test]
    fn alternates_in_pool_order() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let rr = RoundRobin;
        let picks: Vec<String> = (0..6)
            .map(|_| rr.pick(&pool, &pool.backends, &ctx()).unwrap().config.id.clone())
            .collect();
        assert_eq!(picks, ["a", "b", "a", "b", "a", "b"]);
    }

    #[test]
    fn empty_candidates_yield_none() {
        let pool = pool_with(&[("a", 1)]);
        assert!(RoundRobin.pick(&pool, &[], &ctx()).is_none());
    }

    #[test]
    fn each_candidate_seen_over_a_cycle() {
        let pool = pool_with(&[("a", 1), ("b", 1), ("c", 1)]);
        let rr = RoundRobin;
        let mut counts = std::collections::HashMap::new();
        for _ in 0..9 {
            let id = rr.pick(&pool, &pool.backends, &ctx()).unwrap().config.id.clone();
            *counts.entry(id).or_insert(0) += 1;
        }
        assert!(counts.values().all(|&c| c == 3));
    }
}
