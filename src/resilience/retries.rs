//! Attempt outcome classification for the retry loop.

use axum::http::Method;

use crate::config::schema::RetryPolicy;

/// Why an attempt failed. Drives retry decisions, health records and the
/// per-backend failure ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// TCP/TLS/DNS failure before the request reached the backend.
    Connect,
    /// The attempt exceeded its timeout.
    Timeout,
    /// Transport error after bytes may have reached the backend.
    Transport,
    /// Upstream answered with a status from the retryable set.
    Status(u16),
}

impl FailureKind {
    /// Stable reason string for logs and the failure ring.
    pub fn reason(&self) -> String {
        match self {
            FailureKind::Connect => "connect_error".to_string(),
            FailureKind::Timeout => "timeout".to_string(),
            FailureKind::Transport => "transport_error".to_string(),
            FailureKind::Status(code) => format!("status_{code}"),
        }
    }

    /// Whether the failure is guaranteed to have happened before any bytes
    /// were sent upstream.
    pub fn is_pre_send(&self) -> bool {
        matches!(self, FailureKind::Connect)
    }
}

/// Whether a status counts as a retryable failure under the policy.
pub fn status_is_retryable(policy: &RetryPolicy, status: u16) -> bool {
    policy.retryable_status_codes.contains(&status)
}

/// Whether the policy treats this method as non-idempotent.
pub fn method_is_non_idempotent(policy: &RetryPolicy, method: &Method) -> bool {
    policy
        .non_idempotent_methods
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method.as_str()))
}

/// Whether this failure may trigger another attempt, given the method.
///
/// Non-idempotent methods are retried only on pre-send connect failures,
/// and only when the policy explicitly allows it.
pub fn may_retry(policy: &RetryPolicy, method: &Method, failure: FailureKind) -> bool {
    if !method_is_non_idempotent(policy, method) {
        return true;
    }
    failure.is_pre_send() && policy.retry_non_idempotent_on_connect_failure
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retryable_statuses() {
        let policy = RetryPolicy::default();
        assert!(status_is_retryable(&policy, 502));
        assert!(status_is_retryable(&policy, 503));
        assert!(status_is_retryable(&policy, 504));
        assert!(!status_is_retryable(&policy, 500));
        assert!(!status_is_retryable(&policy, 200));
    }

    #[test]
    fn get_is_always_retryable() {
        let policy = RetryPolicy::default();
        assert!(may_retry(&policy, &Method::GET, FailureKind::Transport));
        assert!(may_retry(&policy, &Method::GET, FailureKind::Status(503)));
    }

    #[test]
    fn post_is_not_retryable_by_default() {
        let policy = RetryPolicy::default();
        assert!(!may_retry(&policy, &Method::POST, FailureKind::Connect));
        assert!(!may_retry(&policy, &Method::POST, FailureKind::Status(503)));
    }

    #[test]
    fn post_retries_on_connect_failure_when_allowed() {
        let policy = RetryPolicy {
            retry_non_idempotent_on_connect_failure: true,
            ..RetryPolicy::default()
        };
        assert!(may_retry(&policy, &Method::POST, FailureKind::Connect));
        // Bytes may have been sent: still refused.
        assert!(!may_retry(&policy, &Method::POST, FailureKind::Transport));
        assert!(!may_retry(&policy, &Method::POST, FailureKind::Timeout));
        assert!(!may_retry(&policy, &Method::POST, FailureKind::Status(503)));
    }
}
