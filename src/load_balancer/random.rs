//! Weighted random steering.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::service::runtime::{BackendRuntime, PoolState};

/// Random pick proportional to weights; uniform when all weights match.
#[derive(Debug, Default)]
pub struct Random;

impl SteeringAlgorithm for Random {
    fn pick(
        &self,
        _pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>> {
        if candidates.is_empty() {
            return None;
        }

        let total: u64 = candidates.iter().map(|c| u64::from(c.config.weight)).sum();
        let mut rng = rand::thread_rng();
        if total == 0 {
            return Some(Arc::clone(&candidates[rng.gen_range(0..candidates.len())]));
        }

        let mut point = rng.gen_range(0..total);
        for candidate in candidates {
            let weight = u64::from(candidate.config.weight);
            if point < weight {
                return Some(Arc::clone(candidate));
            }
            point -= weight;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::selector::tests_support::{ctx, pool_with};

    #[test]
    fn zero_weight_backends_are_never_picked() {
        let pool = pool_with(&[("a", 0), ("b", 1)]);
        for _ in 0..50 {
            let pick = Random.pick(&pool, &pool.backends, &ctx()).unwrap();
            assert_eq!(pick.config.id, "b");
        }
    }

    #[test]
    fn weighted_distribution_is_roughly_proportional() {
        let pool = pool_with(&[("a", 9), ("b", 1)]);
        let mut a_hits = 0;
        for _ in 0..1000 {
            if Random.pick(&pool, &pool.backends, &ctx()).unwrap().config.id == "a" {
                a_hits += 1;
            }
        }
        // Expect ~900; allow generous noise.
        assert!((800..=980).contains(&a_hits), "a got {a_hits}/1000");
    }
}
