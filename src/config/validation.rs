//! Configuration validation logic.
//!
//! Syntactic shape is serde's job; this module covers the semantic rules a
//! blob must satisfy before it may replace a live service config.

use std::collections::HashSet;

use crate::config::schema::{AffinityKind, ServiceConfig};
use crate::routing::hostname::is_valid_pattern;

/// A single semantic violation in a service config.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

fn err(errors: &mut Vec<ValidationError>, msg: impl Into<String>) {
    errors.push(ValidationError(msg.into()));
}

/// Validate a normalized [`ServiceConfig`] for semantic correctness.
pub fn validate_service_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_valid_pattern(&config.hostname) {
        err(
            &mut errors,
            format!(
                "hostname '{}' is neither an exact FQDN nor a '*.suffix' pattern",
                config.hostname
            ),
        );
    }

    if config.pools.is_empty() {
        err(&mut errors, "service must define at least one pool");
    }

    let mut pool_ids = HashSet::new();
    let mut any_weighted = false;
    for pool in &config.pools {
        if !pool_ids.insert(pool.id.as_str()) {
            err(&mut errors, format!("duplicate pool id '{}'", pool.id));
        }
        if pool.backends.is_empty() {
            err(&mut errors, format!("pool '{}' has no backends", pool.id));
        }

        let mut backend_ids = HashSet::new();
        for backend in &pool.backends {
            if !backend_ids.insert(backend.id.as_str()) {
                err(
                    &mut errors,
                    format!("duplicate backend id '{}' in pool '{}'", backend.id, pool.id),
                );
            }
            match backend.url.scheme() {
                "http" | "https" => {}
                other => err(
                    &mut errors,
                    format!(
                        "backend '{}' url scheme '{}' is not http or https",
                        backend.id, other
                    ),
                ),
            }
            if backend.url.host_str().is_none() {
                err(
                    &mut errors,
                    format!("backend '{}' url has no host", backend.id),
                );
            }
            if backend.weight > 0 {
                any_weighted = true;
            }
        }
    }
    if !config.pools.is_empty() && !any_weighted {
        err(&mut errors, "at least one backend must have weight > 0");
    }

    let hc = &config.active_hc;
    if hc.interval_secs < 1 {
        err(&mut errors, "active_hc.interval_secs must be >= 1");
    }
    if hc.timeout_secs >= hc.interval_secs {
        err(
            &mut errors,
            "active_hc.timeout_secs must be < active_hc.interval_secs",
        );
    }
    if hc.consecutive_down == 0 || hc.consecutive_up == 0 {
        err(
            &mut errors,
            "active_hc consecutive thresholds must be > 0",
        );
    }

    let rp = &config.retry_policy;
    if rp.overall_deadline_ms < rp.attempt_timeout_ms {
        err(
            &mut errors,
            "retry_policy.overall_deadline_ms must be >= attempt_timeout_ms",
        );
    }

    let cb = &config.passive_hc.circuit_breaker;
    if !(0.0..=1.0).contains(&cb.error_rate_threshold) {
        err(
            &mut errors,
            "circuit_breaker.error_rate_threshold must be within 0..=1",
        );
    }

    let sa = &config.session_affinity;
    if sa.kind == AffinityKind::Jwt && sa.jwt.secret.is_empty() {
        err(
            &mut errors,
            "session_affinity.jwt.secret is required when kind = jwt",
        );
    }
    if sa.kind == AffinityKind::Custom && sa.custom_sources.is_empty() {
        err(
            &mut errors,
            "session_affinity.custom_sources is required when kind = custom",
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
