//! IP-hash steering.
//!
//! The client IP hashes into weighted buckets, so a given IP keeps landing
//! on the same backend as long as the candidate set is unchanged. Changing
//! the set remaps (new bucket layout), which is the documented behavior.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::load_balancer::{SelectionContext, SteeringAlgorithm};
use crate::service::runtime::{BackendRuntime, PoolState};

#[derive(Debug, Default)]
pub struct IpHash;

impl SteeringAlgorithm for IpHash {
    fn pick(
        &self,
        _pool: &PoolState,
        candidates: &[Arc<BackendRuntime>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<BackendRuntime>> {
        if candidates.is_empty() {
            return None;
        }

        // DefaultHasher with default keys is deterministic per process.
        let mut hasher = DefaultHasher::new();
        ctx.client_ip.hash(&mut hasher);
        let hash = hasher.finish();

        let total: u64 = candidates.iter().map(|c| u64::from(c.config.weight)).sum();
        if total == 0 {
            return Some(Arc::clone(&candidates[(hash % candidates.len() as u64) as usize]));
        }

        let mut point = hash % total;
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
    use crate::load_balancer::selector::tests_support::{ctx_for_ip, pool_with};

    #[test]
    fn same_ip_always_lands_on_the_same_backend() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let ctx = ctx_for_ip("203.0.113.7");
        let first = IpHash.pick(&pool, &pool.backends, &ctx).unwrap().config.id.clone();
        for _ in 0..100 {
            let pick = IpHash.pick(&pool, &pool.backends, &ctx).unwrap();
            assert_eq!(pick.config.id, first);
        }
    }

    #[test]
    fn shrinking_the_candidate_set_remaps_stably() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let ctx = ctx_for_ip("203.0.113.7");
        let first = IpHash.pick(&pool, &pool.backends, &ctx).unwrap();

        let survivors: Vec<_> = pool
            .backends
            .iter()
            .filter(|b| b.config.id != first.config.id)
            .cloned()
            .collect();
        let remapped = IpHash.pick(&pool, &survivors, &ctx).unwrap().config.id.clone();
        assert_ne!(remapped, first.config.id);
        for _ in 0..20 {
            assert_eq!(IpHash.pick(&pool, &survivors, &ctx).unwrap().config.id, remapped);
        }
    }

    #[test]
    fn different_ips_spread_across_weighted_buckets() {
        let pool = pool_with(&[("a", 3), ("b", 1)]);
        let mut a_hits = 0;
        for i in 0..256 {
            let ctx = ctx_for_ip(&format!("10.1.{}.{}", i / 16, i % 16));
            if IpHash.pick(&pool, &pool.backends, &ctx).unwrap().config.id == "a" {
                a_hits += 1;
            }
        }
        // Weight 3:1 should put clearly more than half the IPs on 'a'.
        assert!(a_hits > 128, "a got only {a_hits}/256");
    }
}
