//! Session affinity: key derivation and the sticky-binding table.
//!
//! Bindings are best-effort: a hit whose backend left the candidate set is
//! purged and selection falls back to a fresh pick. TTLs slide on every
//! hit; expired entries are dropped on read and by the periodic sweep.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::HeaderMap;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::config::schema::{AffinityKind, SessionAffinityConfig};

#[derive(Debug)]
struct AffinityEntry {
    pool_id: String,
    backend_id: String,
    expires_at_ms: AtomicU64,
}

/// Concurrent map `affinity_key → (pool_id, backend_id)` with sliding TTL.
#[derive(Debug, Default)]
pub struct SessionAffinityTable {
    entries: DashMap<String, AffinityEntry>,
}

impl SessionAffinityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a key, sliding its TTL. Expired entries are dropped.
    pub fn lookup(&self, key: &str, now_ms: u64, ttl_ms: u64) -> Option<(String, String)> {
        let entry = self.entries.get(key)?;
        if entry.expires_at_ms.load(Ordering::Relaxed) < now_ms {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.expires_at_ms.store(now_ms + ttl_ms, Ordering::Relaxed);
        Some((entry.pool_id.clone(), entry.backend_id.clone()))
    }

    /// Bind (or rebind) a key to a backend.
    pub fn bind(&self, key: &str, pool_id: &str, backend_id: &str, now_ms: u64, ttl_ms: u64) {
        self.entries.insert(
            key.to_string(),
            AffinityEntry {
                pool_id: pool_id.to_string(),
                backend_id: backend_id.to_string(),
                expires_at_ms: AtomicU64::new(now_ms + ttl_ms),
            },
        );
    }

    /// Purge one binding (its backend left the candidate set).
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Evict every binding pointing at a backend (disable/remove).
    pub fn remove_backend(&self, pool_id: &str, backend_id: &str) {
        self.entries
            .retain(|_, entry| !(entry.pool_id == pool_id && entry.backend_id == backend_id));
    }

    /// Admin "clear sessions".
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Periodic TTL sweep.
    pub fn sweep(&self, now_ms: u64) {
        self.entries
            .retain(|_, entry| entry.expires_at_ms.load(Ordering::Relaxed) >= now_ms);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Derive the affinity key for a request, per config.
pub fn derive_key(
    cfg: &SessionAffinityConfig,
    headers: &HeaderMap,
    client_ip: IpAddr,
) -> Option<String> {
    match cfg.kind {
        AffinityKind::None => None,
        AffinityKind::Ip => Some(client_ip.to_string()),
        AffinityKind::Cookie => cookie_value(headers, &cfg.cookie.name),
        AffinityKind::Header => header_value(headers, &cfg.header_name),
        AffinityKind::Jwt => jwt_claim(headers, &cfg.jwt.secret, &cfg.jwt.claim),
        AffinityKind::Custom => cfg.custom_sources.iter().find_map(|source| {
            if source == "ip" {
                Some(client_ip.to_string())
            } else if let Some(name) = source.strip_prefix("header:") {
                header_value(headers, name)
            } else if let Some(name) = source.strip_prefix("cookie:") {
                cookie_value(headers, name)
            } else {
                None
            }
        }),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get_all("cookie").iter().find_map(|header| {
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name && !v.is_empty()).then(|| v.to_string())
        })
    })
}

fn jwt_claim(headers: &HeaderMap, secret: &str, claim: &str) -> Option<String> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))?;

    // Signature check only; affinity keying must not break on expiry.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()?;

    match data.claims.get(claim)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
