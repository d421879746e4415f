//! Reconnect backoff schedule.

use std::time::Duration;

use parley_shared::constants::{RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS};

/// Delay before reconnect attempt number `attempt` (1-based): the base
/// delay doubled per attempt, capped at the maximum.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let millis = RECONNECT_BASE_DELAY_MS
        .saturating_mul(factor)
        .min(RECONNECT_MAX_DELAY_MS);
    Duration::from_millis(millis)
}
