use std::time::Duration;

pub const BASE_DELAY_MS: u64 = 1000;
pub const MAX_DELAY_MS: u64 = 16_000;

/// Delay before retry number `attempt` (1 for the first retry): 2s, 4s, 8s, 16s, 16s...
pub fn backoff_delay(attempt: u32) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt);
    Duration::from_millis(BASE_DELAY_MS.saturating_mul(multiplier).min(MAX_DELAY_MS))
}
