//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= consecutive_down
//! Unhealthy → Healthy: consecutive successes >= consecutive_up
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Counters reset on state transition
//! - The healthy flag is mirrored into an atomic for lock-free selection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Direction of a health transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Up,
    Down,
}

#[derive(Debug)]
struct HealthCore {
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_ms: Option<u64>,
}

/// Counters and flag backing one backend's health.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    core: Mutex<HealthCore>,
}

/// Point-in-time view for metrics and admin responses.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_ms: Option<u64>,
}

impl HealthState {
    /// Backends start healthy until proven otherwise.
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            core: Mutex::new(HealthCore {
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_ms: None,
            }),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let core = self.core.lock().unwrap();
        HealthSnapshot {
            healthy: self.healthy.load(Ordering::Relaxed),
            consecutive_failures: core.consecutive_failures,
            consecutive_successes: core.consecutive_successes,
            last_failure_ms: core.last_failure_ms,
        }
    }

    /// Record a success; returns `Some(Up)` when the streak recovers the
    /// backend.
    pub fn record_success(&self, consecutive_up: u32) -> Option<HealthTransition> {
        let mut core = self.core.lock().unwrap();
        core.consecutive_failures = 0;
        core.consecutive_successes = core.consecutive_successes.saturating_add(1);
        if !self.healthy.load(Ordering::Relaxed) && core.consecutive_successes >= consecutive_up {
            core.consecutive_successes = 0;
            self.healthy.store(true, Ordering::Relaxed);
            return Some(HealthTransition::Up);
        }
        None
    }

    /// Record a failure; returns `Some(Down)` when the streak exhausts the
    /// threshold.
    pub fn record_failure(&self, consecutive_down: u32, now_ms: u64) -> Option<HealthTransition> {
        let mut core = self.core.lock().unwrap();
        core.consecutive_successes = 0;
        core.consecutive_failures = core.consecutive_failures.saturating_add(1);
        core.last_failure_ms = Some(now_ms);
        if self.healthy.load(Ordering::Relaxed) && core.consecutive_failures >= consecutive_down {
            core.consecutive_failures = 0;
            self.healthy.store(false, Ordering::Relaxed);
            return Some(HealthTransition::Down);
        }
        None
    }

    /// Immediately mark unhealthy (abandoned probe).
    pub fn force_down(&self, now_ms: u64) -> Option<HealthTransition> {
        let mut core = self.core.lock().unwrap();
        core.consecutive_successes = 0;
        core.last_failure_ms = Some(now_ms);
        if self.healthy.swap(false, Ordering::Relaxed) {
            core.consecutive_failures = 0;
            Some(HealthTransition::Down)
        } else {
            None
        }
    }

    /// Admin reset: healthy with clean counters.
    pub fn reset(&self) {
        let mut core = self.core.lock().unwrap();
        core.consecutive_failures = 0;
        core.consecutive_successes = 0;
        self.healthy.store(true, Ordering::Relaxed);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_after_streak_up_after_streak() {
        let state = HealthState::new();
        assert!(state.is_healthy());

        assert_eq!(state.record_failure(3, 1), None);
        assert_eq!(state.record_failure(3, 2), None);
        assert_eq!(state.record_failure(3, 3), Some(HealthTransition::Down));
        assert!(!state.is_healthy());

        assert_eq!(state.record_success(2), None);
        assert_eq!(state.record_success(2), Some(HealthTransition::Up));
        assert!(state.is_healthy());
    }

    #[test]
    fn success_resets_failure_streak() {
        let state = HealthState::new();
        state.record_failure(3, 1);
        state.record_failure(3, 2);
        state.record_success(2);
        assert_eq!(state.record_failure(3, 3), None);
        assert_eq!(state.record_failure(3, 4), None);
        assert_eq!(state.record_failure(3, 5), Some(HealthTransition::Down));
    }

    #[test]
    fn no_intermediate_flaps() {
        let state = HealthState::new();
        for i in 0..10 {
            let t = state.record_failure(3, i);
            // Only one Down transition across a long failure run.
            if i == 2 {
                assert_eq!(t, Some(HealthTransition::Down));
            } else {
                assert_eq!(t, None);
            }
        }
    }

    #[test]
    fn reset_restores_healthy() {
        let state = HealthState::new();
        for i in 0..3 {
            state.record_failure(3, i);
        }
        assert!(!state.is_healthy());
        state.reset();
        assert!(state.is_healthy());
        assert_eq!(state.snapshot().consecutive_failures, 0);
    }
}
