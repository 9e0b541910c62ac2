//! Least-connections steering.

use std::sync::Arc;

use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::service::runtime::{BackendRuntime, PoolState};

/// Picks the candidate with the fewest inflight connections.
/// Ties break by weight (descending), then id (lexicographic).
#[derive(Debug, Default)]
pub struct LeastConnections;

impl SteeringAlgorithm for LeastConnections {
    fn pick(
        &self,
        _pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.inflight()
                    .cmp(&b.inflight())
                    .then(b.config.weight.cmp(&a.config.weight))
                    .then(a.config.id.cmp(&b.config.id))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::selector::tests_support::{ctx, pool_with};

    #[test]
    fn picks_fewest_inflight() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let _busy = pool.backends[0].inflight_guard();

        let pick = LeastConnections.pick(&pool, &pool.backends, &ctx()).unwrap();
        assert_eq!(pick.config.id, "b");
    }

    #[test]
    fn ties_break_by_weight_then_id() {
        let pool = pool_with(&[("b", 1), ("a", 1), ("c", 5)]);
        // All idle: highest weight wins.
        let pick = LeastConnections.pick(&pool, &pool.backends, &ctx()).unwrap();
        assert_eq!(pick.config.id, "c");

        let pool = pool_with(&[("b", 1), ("a", 1)]);
        let pick = LeastConnections.pick(&pool, &pool.backends, &ctx()).unwrap();
        assert_eq!(pick.config.id, "a");
    }

    #[test]
    fn empty_candidates_yield_none() {
        let pool = pool_with(&[("a", 1)]);
        assert!(LeastConnections.pick(&pool, &[], &ctx()).is_none());
    }
}
