//! Reconnect delay computation.
//!
//! Exponential growth capped at a configured maximum, plus an additive
//! uniform jitter window so that many clients losing the same leader do not
//! reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

/// Computes the delay before retry attempt `attempt` (1-indexed).
///
/// The pre-jitter delay is `min(base_delay * growth_factor^attempt,
/// delay_cap)`; the jitter adds a uniformly random duration in
/// `[0, jitter_window]`.
pub(crate) fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let scaled = policy.base_delay.as_secs_f64() * policy.growth_factor.powf(f64::from(attempt));
    let capped = if scaled.is_finite() {
        Duration::from_secs_f64(scaled.min(policy.delay_cap.as_secs_f64()))
    } else {
        policy.delay_cap
    };

    capped + jitter(policy.jitter_window)
}

/// Draws a uniformly random duration in `[0, window]`.
fn jitter(window: Duration) -> Duration {
    if window.is_zero() {
        return Duration::ZERO;
    }

    let upper = window.as_secs_f64();
    Duration::from_secs_f64(rand::rng().random_range(0.0..=upper))
}
