use pipsync_core::RetryPolicy;
use std::time::Duration;

/// Delay before the retry that follows failed attempt number `attempt`
/// (1-based).
///
/// Exponential from `base_delay_ms`, capped at `max_delay_ms`, then reduced by
/// up to `jitter_ratio` of itself using `sample` in `[0, 1)`. Jitter only ever
/// shortens the delay, so the cap holds after jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, sample: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let raw = policy
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.max_delay_ms);
    let ratio = policy.jitter_ratio.clamp(0.0, 1.0);
    let sample = sample.clamp(0.0, 1.0);
    let jittered = (raw as f64) * (1.0 - ratio * sample);
    Duration::from_millis(jittered.round().min(policy.max_delay_ms as f64) as u64)
}

pub fn should_retry_status(policy: &RetryPolicy, status: u16) -> bool {
    policy.retry_on_statuses.contains(&status)
}
