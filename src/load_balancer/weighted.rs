//! Smooth weighted round-robin steering.
//!
//! Nginx-style: every pick adds each candidate's weight to its running
//! score, takes the highest score, then subtracts the weight sum from the
//! winner. Produces the evenly interleaved sequence (e.g. weights 3/1 give
//! `A A B A` per cycle, not `A A A B`).

use std::sync::Arc;

use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::service::runtime::{BackendRuntime, PoolState};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin;

impl SteeringAlgorithm for WeightedRoundRobin {
    fn pick(
        &self,
        pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>> {
        let total: i64 = candidates.iter().map(|c| i64::from(c.config.weight)).sum();
        if total == 0 {
            return None;
        }

        let mut current = pool.runtime.wrr_current.lock().unwrap();
        let mut winner: Option<usize> = None;
        let mut winner_score = i64::MIN;
        for (index, candidate) in candidates.iter().enumerate() {
            let weight = i64::from(candidate.config.weight);
            if weight == 0 {
                continue;
            }
            let score = current
                .entry(candidate.config.id.clone())
                .and_modify(|s| *s += weight)
                .or_insert(weight);
            // Strict comparison keeps ties on insertion order.
            if *score > winner_score {
                winner_score = *score;
                winner = Some(index);
            }
        }

        let index = winner?;
        if let Some(score) = current.get_mut(&candidates[index].config.id) {
            *score -= total;
        }
        Some(Arc::clone(&candidates[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::selector::tests_support::{ctx, pool_with};

    fn sequence(pool: &PoolState, n: usize) -> Vec<String> {
        let wrr = WeightedRoundRobin;
        (0..n)
            .map(|_| wrr.pick(pool, &pool.backends, &ctx()).unwrap().config.id.clone())
            .collect()
    }

    #[test]
    fn smooth_interleaving_for_three_to_one() {
        let pool = pool_with(&[("a", 3), ("b", 1)]);
        let picks = sequence(&pool, 12);
        let a = picks.iter().filter(|p| *p == "a").count();
        assert_eq!(a, 9);
        // Smooth WRR never serves the heavy backend more than 3 in a row.
        let mut streak = 0;
        for p in &picks {
            if p == "a" {
                streak += 1;
                assert!(streak <= 3);
            } else {
                streak = 0;
            }
        }
    }

    #[test]
    fn distribution_matches_weights_exactly_per_cycle() {
        let pool = pool_with(&[("a", 5), ("b", 1), ("c", 2)]);
        let picks = sequence(&pool, 8);
        assert_eq!(picks.iter().filter(|p| *p == "a").count(), 5);
        assert_eq!(picks.iter().filter(|p| *p == "b").count(), 1);
        assert_eq!(picks.iter().filter(|p| *p == "c").count(), 2);
    }

    #[test]
    fn zero_weight_candidates_are_skipped() {
        let pool = pool_with(&[("a", 0), ("b", 1)]);
        let picks = sequence(&pool, 4);
        assert!(picks.iter().all(|p| p == "b"));
    }

    #[test]
    fn all_zero_weights_yield_none() {
        let pool = pool_with(&[("a", 0), ("b", 0)]);
        assert!(WeightedRoundRobin.pick(&pool, &pool.backends, &ctx()).is_none());
    }
}
