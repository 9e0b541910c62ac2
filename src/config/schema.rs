//! Per-service configuration schema.
//!
//! This module defines the complete configuration structure for one public
//! hostname. All types derive Serde traits; defaults are applied at read
//! time so stored blobs stay minimal.

use serde::{Deserialize, Serialize};
use url::Url;

fn default_true() -> bool {
    true
}

/// Full configuration for one public hostname.
///
/// The hostname is case-folded and may be a wildcard pattern (`*.suffix`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Public hostname this service answers for (exact FQDN or `*.suffix`).
    pub hostname: String,

    /// Ordered backend pools; the first pool with eligible backends wins.
    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    /// Convenience flat backend list; folded into a `default` pool when
    /// `pools` is empty.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Service-level steering policy, used by pools without their own.
    #[serde(default)]
    pub steering_policy: SteeringPolicy,

    /// Session affinity settings.
    #[serde(default)]
    pub session_affinity: SessionAffinityConfig,

    /// Active health probe settings.
    #[serde(default)]
    pub active_hc: ActiveHealthConfig,

    /// Passive health / circuit breaker settings.
    #[serde(default)]
    pub passive_hc: PassiveHealthConfig,

    /// Retry and failover policy.
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Host header rewriting policy.
    #[serde(default)]
    pub host_header_policy: HostHeaderPolicy,

    /// Observability header names and client-IP handling.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Whether deleting the service also drops its metrics history.
    #[serde(default = "default_true")]
    pub purge_metrics_on_delete: bool,
}

impl ServiceConfig {
    /// Minimal config: one round-robin pool over the given backends.
    pub fn single_pool(hostname: impl Into<String>, backends: Vec<BackendConfig>) -> Self {
        Self {
            hostname: hostname.into(),
            pools: vec![PoolConfig {
                id: "default".to_string(),
                enabled: true,
                minimum_origins: 1,
                endpoint_steering: None,
                backends,
            }],
            backends: Vec::new(),
            steering_policy: SteeringPolicy::default(),
            session_affinity: SessionAffinityConfig::default(),
            active_hc: ActiveHealthConfig::default(),
            passive_hc: PassiveHealthConfig::default(),
            retry_policy: RetryPolicy::default(),
            host_header_policy: HostHeaderPolicy::default(),
            observability: ObservabilityConfig::default(),
            purge_metrics_on_delete: true,
        }
    }

    /// Fold the flat `backends` list into a `default` pool and case-fold the
    /// hostname. Idempotent; called on every config write.
    pub fn normalize(&mut self) {
        self.hostname = self.hostname.to_ascii_lowercase();
        if self.pools.is_empty() && !self.backends.is_empty() {
            self.pools.push(PoolConfig {
                id: "default".to_string(),
                enabled: true,
                minimum_origins: 1,
                endpoint_steering: None,
                backends: std::mem::take(&mut self.backends),
            });
        }
    }

    /// Steering policy effective for a pool (pool override, else service).
    pub fn steering_for(&self, pool: &PoolConfig) -> SteeringPolicy {
        pool.endpoint_steering.unwrap_or(self.steering_policy)
    }
}

/// An ordered group of backends sharing a steering policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Pool identifier, unique within the service.
    pub id: String,

    /// Disabled pools are skipped during selection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum number of eligible backends for the pool to serve traffic.
    #[serde(default = "default_minimum_origins")]
    pub minimum_origins: usize,

    /// Steering override for this pool.
    #[serde(default)]
    pub endpoint_steering: Option<SteeringPolicy>,

    /// Backends in this pool.
    pub backends: Vec<BackendConfig>,
}

fn default_minimum_origins() -> usize {
    1
}

/// A concrete upstream origin within a pool.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend identifier, unique within its pool.
    pub id: String,

    /// Absolute http/https origin URL. May contain `$1`, expanded from the
    /// label matched by a wildcard hostname.
    pub url: Url,

    /// Relative weight for weighted steering. Zero means "never picked by
    /// weight" but still usable as an affinity target.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Priority tier; lower values are preferred, higher are fallback.
    #[serde(default)]
    pub priority: u32,

    /// Admin toggle. Disabled backends are never selected.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Region tag for geographic steering.
    #[serde(default)]
    pub region: Option<String>,
}

fn default_weight() -> u32 {
    1
}

/// Backend selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringPolicy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    IpHash,
    Random,
    Geographic,
}

/// Session affinity settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionAffinityConfig {
    /// How the affinity key is derived.
    pub kind: AffinityKind,

    /// Sliding TTL for affinity entries, in seconds.
    pub ttl_secs: u64,

    /// Cookie settings (kind = cookie).
    pub cookie: CookieAffinityConfig,

    /// Header name to read the key from (kind = header).
    pub header_name: String,

    /// JWT settings (kind = jwt).
    pub jwt: JwtAffinityConfig,

    /// Ordered key sources for kind = custom: `header:<name>`,
    /// `cookie:<name>` or `ip`. First resolvable source wins.
    pub custom_sources: Vec<String>,
}

impl Default for SessionAffinityConfig {
    fn default() -> Self {
        Self {
            kind: AffinityKind::None,
            ttl_secs: 3600,
            cookie: CookieAffinityConfig::default(),
            header_name: "x-affinity-key".to_string(),
            jwt: JwtAffinityConfig::default(),
            custom_sources: Vec::new(),
        }
    }
}

/// Source of the session affinity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityKind {
    #[default]
    None,
    Cookie,
    Ip,
    Header,
    Jwt,
    Custom,
}

/// Cookie-based affinity settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieAffinityConfig {
    /// Cookie name carrying the affinity key.
    pub name: String,

    /// Set the `Secure` attribute on emitted cookies.
    pub secure: bool,

    /// `SameSite` attribute on emitted cookies.
    pub same_site: SameSite,
}

impl Default for CookieAffinityConfig {
    fn default() -> Self {
        Self {
            name: "lb_sticky".to_string(),
            secure: false,
            same_site: SameSite::Lax,
        }
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// JWT-claim affinity settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtAffinityConfig {
    /// HS256 secret used to verify the token signature.
    pub secret: String,

    /// Claim whose value becomes the affinity key.
    pub claim: String,
}

impl Default for JwtAffinityConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            claim: "sub".to_string(),
        }
    }
}

/// Active health probe settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ActiveHealthConfig {
    /// Enable periodic probes.
    pub enabled: bool,

    /// Probe interval in seconds (>= 1).
    pub interval_secs: u64,

    /// Per-probe timeout in seconds (< interval).
    pub timeout_secs: u64,

    /// Probe HTTP method.
    pub method: String,

    /// Probe path on the backend origin.
    pub path: String,

    /// Statuses counted as probe success.
    pub expected_status: Vec<u16>,

    /// Optional substring the probe body must contain.
    pub body_substring: Option<String>,

    /// Consecutive probe failures before a backend turns unhealthy.
    pub consecutive_down: u32,

    /// Consecutive probe successes before an unhealthy backend recovers.
    pub consecutive_up: u32,
}

impl Default for ActiveHealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            method: "GET".to_string(),
            path: "/health".to_string(),
            expected_status: vec![200],
            body_substring: None,
            consecutive_down: 3,
            consecutive_up: 2,
        }
    }
}

/// Passive health settings (signals from live traffic).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PassiveHealthConfig {
    /// Feed proxied request outcomes into health state.
    pub enabled: bool,

    /// Circuit breaker parameters.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PassiveHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Per-backend circuit breaker parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the sliding window that trip the breaker.
    pub failure_threshold: u32,

    /// Error-rate (0..=1) that trips the breaker once `min_samples` is met.
    pub error_rate_threshold: f64,

    /// Minimum outcomes in the window before the error rate applies.
    pub min_samples: u32,

    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Time the breaker stays open before allowing a half-open probe.
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            error_rate_threshold: 0.5,
            min_samples: 10,
            window_secs: 30,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// Retry and failover policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,

    /// Per-attempt timeout in milliseconds.
    pub attempt_timeout_ms: u64,

    /// Total wall-clock budget across all attempts, in milliseconds.
    pub overall_deadline_ms: u64,

    /// Upstream statuses treated as retryable failures.
    pub retryable_status_codes: Vec<u16>,

    /// Methods never retried after bytes reached the upstream.
    pub non_idempotent_methods: Vec<String>,

    /// Allow retrying non-idempotent methods on pre-send connect failures.
    pub retry_non_idempotent_on_connect_failure: bool,

    /// Backoff between attempts.
    pub backoff: BackoffConfig,

    /// Largest body buffered for replay; larger bodies stream through and
    /// disable retries.
    pub max_replay_body_bytes: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout_ms: 10_000,
            overall_deadline_ms: 30_000,
            retryable_status_codes: vec![502, 503, 504],
            non_idempotent_methods: vec!["POST".to_string(), "PATCH".to_string()],
            retry_non_idempotent_on_connect_failure: false,
            backoff: BackoffConfig::default(),
            max_replay_body_bytes: 1024 * 1024,
        }
    }
}

/// Backoff between retry attempts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay growth strategy.
    pub strategy: BackoffStrategy,

    /// Base delay in milliseconds.
    pub base_ms: u64,

    /// Delay cap in milliseconds.
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialWithJitter,
            base_ms: 100,
            max_ms: 2000,
        }
    }
}

/// Backoff delay growth strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
    #[default]
    ExponentialWithJitter,
}

/// Host header rewriting policy.
///
/// Serialised as a plain string: `"preserve"`, `"backend_hostname"`, or any
/// other string taken as a literal Host value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostHeaderPolicy {
    /// Keep the client's original Host.
    #[default]
    Preserve,
    /// Use the backend URL's hostname.
    BackendHostname,
    /// Use this exact value.
    Literal(String),
}

impl Serialize for HostHeaderPolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            HostHeaderPolicy::Preserve => "preserve",
            HostHeaderPolicy::BackendHostname => "backend_hostname",
            HostHeaderPolicy::Literal(v) => v.as_str(),
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for HostHeaderPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "preserve" => HostHeaderPolicy::Preserve,
            "backend_hostname" => HostHeaderPolicy::BackendHostname,
            _ => HostHeaderPolicy::Literal(s),
        })
    }
}

/// How `X-Forwarded-For` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum XffMode {
    /// Append the client IP to any existing chain.
    #[default]
    Append,
    /// Replace the chain with the client IP.
    Replace,
}

/// Observability header names and client-IP handling, per service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Response header naming the backend that served the request.
    pub header_backend_used: String,

    /// Response header carrying the attempt count.
    pub header_attempts: String,

    /// Request/response header carrying the request id.
    pub header_request_id: String,

    /// `X-Forwarded-For` handling.
    pub xff: XffMode,

    /// Trusted header to read the client IP from, if set.
    pub trusted_ip_header: Option<String>,

    /// Request header carrying the client region for geographic steering.
    pub region_header: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            header_backend_used: "x-backend-used".to_string(),
            header_attempts: "x-attempts".to_string(),
            header_request_id: "x-request-id".to_string(),
            xff: XffMode::Append,
            trusted_ip_header: None,
            region_header: "x-client-region".to_string(),
        }
    }
}

/// Top-level keys a service config blob may carry. Anything else is ignored
/// with a warning so older blobs survive schema growth.
pub const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "hostname",
    "pools",
    "backends",
    "steering_policy",
    "session_affinity",
    "active_hc",
    "passive_hc",
    "retry_policy",
    "host_header_policy",
    "observability",
    "purge_metrics_on_delete",
];

/// Collect unknown top-level keys from a raw JSON config object.
pub fn unknown_top_level_keys(raw: &serde_json::Value) -> Vec<String> {
    match raw.as_object() {
        Some(map) => map
            .keys()
            .filter(|k| !KNOWN_TOP_LEVEL_KEYS.contains(&k.as_str()))
            .cloned()
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_flat_backends_into_default_pool() {
        let mut config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "hostname": "App.Example.COM",
            "backends": [
                {"id": "a", "url": "http://10.0.0.1:8080"},
                {"id": "b", "url": "http://10.0.0.2:8080"}
            ]
        }))
        .unwrap();
        config.normalize();

        assert_eq!(config.hostname, "app.example.com");
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].id, "default");
        assert_eq!(config.pools[0].backends.len(), 2);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn host_header_policy_round_trips_as_string() {
        let p: HostHeaderPolicy = serde_json::from_value(serde_json::json!("preserve")).unwrap();
        assert_eq!(p, HostHeaderPolicy::Preserve);
        let p: HostHeaderPolicy =
            serde_json::from_value(serde_json::json!("backend_hostname")).unwrap();
        assert_eq!(p, HostHeaderPolicy::BackendHostname);
        let p: HostHeaderPolicy =
            serde_json::from_value(serde_json::json!("internal.example")).unwrap();
        assert_eq!(p, HostHeaderPolicy::Literal("internal.example".to_string()));
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            serde_json::json!("internal.example")
        );
    }

    #[test]
    fn unknown_keys_are_collected_not_rejected() {
        let raw = serde_json::json!({
            "hostname": "a.example.com",
            "pools": [],
            "shiny_new_toggle": true
        });
        assert_eq!(unknown_top_level_keys(&raw), vec!["shiny_new_toggle"]);
    }

    #[test]
    fn defaults_fill_in_at_parse_time() {
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "hostname": "a.example.com",
            "pools": [{"id": "p", "backends": [{"id": "a", "url": "http://o:1"}]}]
        }))
        .unwrap();
        assert_eq!(config.retry_policy.max_retries, 2);
        assert_eq!(config.retry_policy.retryable_status_codes, vec![502, 503, 504]);
        assert_eq!(config.active_hc.consecutive_down, 3);
        assert!(config.pools[0].enabled);
        assert_eq!(config.pools[0].backends[0].weight, 1);
    }
}
