//! Backoff between retry attempts.

use std::time::Duration;

use crate::config::schema::{BackoffConfig, BackoffStrategy};

/// Delay before retry number `attempt` (1-based: the delay after the first
/// failed attempt is `attempt = 1`).
pub fn delay_for(cfg: &BackoffConfig, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let raw_ms = match cfg.strategy {
        BackoffStrategy::Constant => cfg.base_ms,
        BackoffStrategy::Linear => cfg.base_ms.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
            cfg.base_ms.saturating_mul(2u64.saturating_pow(attempt - 1))
        }
    };
    let capped = raw_ms.min(cfg.max_ms);

    let delay_ms = match cfg.strategy {
        BackoffStrategy::ExponentialWithJitter => {
            // ±10% jitter around the capped delay.
            let spread = capped / 10;
            if spread > 0 {
                capped - spread + fastrand::u64(0..=spread * 2)
            } else {
                capped
            }
        }
        _ => capped,
    };

    Duration::from_millis(delay_ms)
}
