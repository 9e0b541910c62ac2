//! IP-based rate limiting for the admin surface.

use std::net::IpAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-IP token buckets for the admin API.
#[derive(Debug)]
pub struct RateLimiterState {
    buckets: DashMap<IpAddr, TokenBucket>,
    refill_per_sec: f64,
    burst: f64,
}

impl RateLimiterState {
    /// `per_minute` requests refill with `burst` capacity.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            refill_per_sec: f64::from(per_minute) / 60.0,
            burst: f64::from(burst),
        }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        let mut bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.refill_per_sec)
    }
}

/// Middleware rejecting over-limit admin clients with 429.
pub async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<Arc<RateLimiterState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.check(addr.ip()) {
        next.run(request).await
    } else {
        tracing::warn!(ip = %addr.ip(), "admin rate limit exceeded");
        metrics::record_rate_limited();
        crate::admin::envelope::error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited")
    }
}
