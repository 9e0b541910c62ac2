//! Geographic steering.
//!
//! When the request carries a region tag and any candidate declares a
//! matching region, selection is restricted to those candidates before the
//! fallback algorithm (round-robin) applies. Requests without a region, or
//! with a region no backend declares, use the full candidate set.

use std::sync::Arc;

use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::service::runtime::{BackendRuntime, PoolState};

#[derive(Debug, Default)]
pub struct Geographic;

impl SteeringAlgorithm for Geographic {
    fn pick(
        &self,
        pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>> {
        if let Some(region) = ctx.region {
            let matched: Vec<Arc<BackendRuntime>> = candidates
                .iter()
                .filter(|c| {
                    c.config
                        .region
                        .as_deref()
                        .is_some_and(|r| r.eq_ignore_ascii_case(region))
                })
                .cloned()
                .collect();
            if !matched.is_empty() {
                return RoundRobin.pick(pool, &matched, ctx);
            }
        }
        RoundRobin.pick(pool, candidates, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::selector::tests_support::{ctx_for_region, pool_with_regions};

    #[test]
    fn region_match_restricts_candidates() {
        let pool = pool_with_regions(&[("eu1", Some("eu")), ("us1", Some("us")), ("eu2", Some("eu"))]);
        let ctx = ctx_for_region(Some("EU"));
        for _ in 0..10 {
            let pick = Geographic.pick(&pool, &pool.backends, &ctx).unwrap();
            assert!(pick.config.id.starts_with("eu"), "picked {}", pick.config.id);
        }
    }

    #[test]
    fn unmatched_region_falls_back_to_all_candidates() {
        let pool = pool_with_regions(&[("eu1", Some("eu")), ("us1", Some("us"))]);
        let ctx = ctx_for_region(Some("ap"));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10 {
            seen.insert(Geographic.pick(&pool, &pool.backends, &ctx).unwrap().config.id.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn no_region_tag_uses_round_robin_over_all() {
        let pool = pool_with_regions(&[("eu1", Some("eu")), ("us1", Some("us"))]);
        let ctx = ctx_for_region(None);
        let first = Geographic.pick(&pool, &pool.backends, &ctx).unwrap().config.id.clone();
        let second = Geographic.pick(&pool, &pool.backends, &ctx).unwrap().config.id.clone();
        assert_ne!(first, second);
    }
}
