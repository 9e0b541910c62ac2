//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, excluded from selection
//! - Half-Open: one trial request allowed
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures in window >= failure_threshold,
//!                or error rate >= error_rate_threshold on min_samples
//! Open → Half-Open: after recovery_timeout_ms
//! Half-Open → Closed: trial outcome succeeds (probe or live request)
//! Half-Open → Open: trial outcome fails (recovery timer restarts)
//! ```
//!
//! # Design Decisions
//! - Per-backend breaker, not global
//! - Single trial slot in Half-Open; a claim is released if its attempt is
//!   cancelled before an outcome lands

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::schema::CircuitBreakerConfig;

/// Breaker state as exposed in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Observable breaker transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    HalfOpened,
    Closed,
}

#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    opened_at: Option<Instant>,
    opened_at_ms: Option<u64>,
    /// Recent outcomes: (when, was_failure).
    window: VecDeque<(Instant, bool)>,
    trial_in_flight: bool,
}

/// Per-backend circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    core: Mutex<BreakerCore>,
    // Mirrored for lock-free candidate filtering.
    state_cell: AtomicU8,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                opened_at: None,
                opened_at_ms: None,
                window: VecDeque::new(),
                trial_in_flight: false,
            }),
            state_cell: AtomicU8::new(BreakerState::Closed.as_u8()),
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state_cell.load(Ordering::Relaxed))
    }

    pub fn opened_at_ms(&self) -> Option<u64> {
        self.core.lock().unwrap().opened_at_ms
    }

    fn set_state(core: &mut BreakerCore, cell: &AtomicU8, state: BreakerState) {
        core.state = state;
        cell.store(state.as_u8(), Ordering::Relaxed);
    }

    fn prune(core: &mut BreakerCore, now: Instant, cfg: &CircuitBreakerConfig) {
        let window = Duration::from_secs(cfg.window_secs);
        while let Some((when, _)) = core.window.front() {
            if now.duration_since(*when) > window {
                core.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Read-only check used while filtering candidates: closed, open past
    /// its recovery timeout, or half-open with a free trial slot.
    pub fn is_selectable(&self, now: Instant, cfg: &CircuitBreakerConfig) -> bool {
        if self.state() == BreakerState::Closed {
            return true;
        }
        let core = self.core.lock().unwrap();
        match core.state {
            BreakerState::Closed => true,
            BreakerState::Open => core
                .opened_at
                .map(|at| now.duration_since(at) >= Duration::from_millis(cfg.recovery_timeout_ms))
                .unwrap_or(true),
            BreakerState::HalfOpen => !core.trial_in_flight,
        }
    }

    /// Claim the right to send one request. Open breakers past their
    /// recovery timeout flip to half-open and hand out the single trial
    /// slot; a `false` return means the backend stays excluded.
    pub fn try_acquire(
        &self,
        now: Instant,
        cfg: &CircuitBreakerConfig,
    ) -> (bool, Option<BreakerTransition>) {
        let mut core = self.core.lock().unwrap();
        match core.state {
            BreakerState::Closed => (true, None),
            BreakerState::Open => {
                let recovered = core
                    .opened_at
                    .map(|at| now.duration_since(at) >= Duration::from_millis(cfg.recovery_timeout_ms))
                    .unwrap_or(true);
                if recovered {
                    Self::set_state(&mut core, &self.state_cell, BreakerState::HalfOpen);
                    core.trial_in_flight = true;
                    (true, Some(BreakerTransition::HalfOpened))
                } else {
                    (false, None)
                }
            }
            BreakerState::HalfOpen => {
                if core.trial_in_flight {
                    (false, None)
                } else {
                    core.trial_in_flight = true;
                    (true, None)
                }
            }
        }
    }

    /// Release an unfulfilled half-open claim (attempt cancelled before an
    /// outcome was recorded).
    pub fn release_trial(&self) {
        let mut core = self.core.lock().unwrap();
        if core.state == BreakerState::HalfOpen {
            core.trial_in_flight = false;
        }
    }

    /// Record a successful outcome.
    pub fn record_success(&self, now: Instant, cfg: &CircuitBreakerConfig) -> Option<BreakerTransition> {
        let mut core = self.core.lock().unwrap();
        Self::prune(&mut core, now, cfg);
        core.window.push_back((now, false));
        match core.state {
            BreakerState::HalfOpen => {
                Self::set_state(&mut core, &self.state_cell, BreakerState::Closed);
                core.trial_in_flight = false;
                core.opened_at = None;
                core.opened_at_ms = None;
                core.window.clear();
                Some(BreakerTransition::Closed)
            }
            _ => None,
        }
    }

    /// Admin reset: closed, clean window.
    pub fn reset(&self) {
        let mut core = self.core.lock().unwrap();
        Self::set_state(&mut core, &self.state_cell, BreakerState::Closed);
        core.opened_at = None;
        core.opened_at_ms = None;
        core.trial_in_flight = false;
        core.window.clear();
    }

    /// Record a failed outcome; may trip or re-open the breaker.
    pub fn record_failure(
        &self,
        now: Instant,
        now_ms: u64,
        cfg: &CircuitBreakerConfig,
    ) -> Option<BreakerTransition> {
        let mut core = self.core.lock().unwrap();
        Self::prune(&mut core, now, cfg);
        core.window.push_back((now, true));
        match core.state {
            BreakerState::HalfOpen => {
                Self::set_state(&mut core, &self.state_cell, BreakerState::Open);
                core.trial_in_flight = false;
                core.opened_at = Some(now);
                core.opened_at_ms = Some(now_ms);
                Some(BreakerTransition::Opened)
            }
            BreakerState::Closed => {
                let samples = core.window.len() as u32;
                let failures = core.window.iter().filter(|(_, f)| *f).count() as u32;
                let by_count = failures >= cfg.failure_threshold;
                let by_rate = samples >= cfg.min_samples
                    && f64::from(failures) / f64::from(samples) >= cfg.error_rate_threshold;
                if by_count || by_rate {
                    Self::set_state(&mut core, &self.state_cell, BreakerState::Open);
                    core.opened_at = Some(now);
                    core.opened_at_ms = Some(now_ms);
                    Some(BreakerTransition::Opened)
                } else {
                    None
                }
            }
            BreakerState::Open => None,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            error_rate_threshold: 1.0,
            min_samples: 100,
            window_secs: 60,
            recovery_timeout_ms: 1000,
        }
    }

    #[test]
    fn trips_on_failure_count() {
        let breaker = CircuitBreaker::new();
        let cfg = cfg();
        let now = Instant::now();
        assert_eq!(breaker.record_failure(now, 1, &cfg), None);
        assert_eq!(breaker.record_failure(now, 2, &cfg), None);
        assert_eq!(
            breaker.record_failure(now, 3, &cfg),
            Some(BreakerTransition::Opened)
        );
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.is_selectable(now, &cfg));
    }

    #[test]
    fn half_open_after_recovery_single_trial() {
        let breaker = CircuitBreaker::new();
        let cfg = cfg();
        let now = Instant::now();
        for i in 0..3 {
            breaker.record_failure(now, i, &cfg);
        }
        let later = now + Duration::from_millis(1500);
        assert!(breaker.is_selectable(later, &cfg));

        let (ok, transition) = breaker.try_acquire(later, &cfg);
        assert!(ok);
        assert_eq!(transition, Some(BreakerTransition::HalfOpened));

        // Second concurrent claim is refused.
        let (ok, _) = breaker.try_acquire(later, &cfg);
        assert!(!ok);
    }

    #[test]
    fn half_open_success_closes() {
        let breaker = CircuitBreaker::new();
        let cfg = cfg();
        let now = Instant::now();
        for i in 0..3 {
            breaker.record_failure(now, i, &cfg);
        }
        let later = now + Duration::from_millis(1500);
        breaker.try_acquire(later, &cfg);
        assert_eq!(
            breaker.record_success(later, &cfg),
            Some(BreakerTransition::Closed)
        );
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.opened_at_ms(), None);
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new();
        let cfg = cfg();
        let now = Instant::now();
        for i in 0..3 {
            breaker.record_failure(now, i, &cfg);
        }
        let later = now + Duration::from_millis(1500);
        breaker.try_acquire(later, &cfg);
        assert_eq!(
            breaker.record_failure(later, 9, &cfg),
            Some(BreakerTransition::Opened)
        );
        // Timer restarted: still open shortly after.
        assert!(!breaker.is_selectable(later + Duration::from_millis(500), &cfg));
        assert!(breaker.is_selectable(later + Duration::from_millis(1500), &cfg));
    }

    #[test]
    fn trips_on_error_rate_with_min_samples() {
        let breaker = CircuitBreaker::new();
        let cfg = CircuitBreakerConfig {
            failure_threshold: u32::MAX,
            error_rate_threshold: 0.5,
            min_samples: 4,
            window_secs: 60,
            recovery_timeout_ms: 1000,
        };
        let now = Instant::now();
        breaker.record_success(now, &cfg);
        breaker.record_failure(now, 1, &cfg);
        breaker.record_success(now, &cfg);
        // 4th sample takes the failure rate to 2/4 = 0.5.
        assert_eq!(
            breaker.record_failure(now, 2, &cfg),
            Some(BreakerTransition::Opened)
        );
    }

    #[test]
    fn released_trial_frees_the_slot() {
        let breaker = CircuitBreaker::new();
        let cfg = cfg();
        let now = Instant::now();
        for i in 0..3 {
            breaker.record_failure(now, i, &cfg);
        }
        let later = now + Duration::from_millis(1500);
        breaker.try_acquire(later, &cfg);
        breaker.release_trial();
        let (ok, _) = breaker.try_acquire(later, &cfg);
        assert!(ok);
    }
}
