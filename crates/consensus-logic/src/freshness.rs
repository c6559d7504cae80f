//! Epoch window freshness evaluation.

use meridian_primitives::params::EpochParams;
use meridian_state::epoch::EpochData;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum FreshnessError {
    /// The window bounds don't describe a usable interval.  This is a broken
    /// configuration or corrupted state, never a normal outcome.
    #[error("epoch {0} window malformed (start {1}ms, duration {2}ms)")]
    MalformedWindow(u64, u64, u64),
}

/// Returns whether the epoch's window `[start, start + duration)` has not
/// yet elapsed at `now_millis`.  Pure and read-only; the only error case is
/// a malformed window, which callers must treat as fatal rather than as a
/// stale epoch.
pub fn evaluate_epoch_freshness(
    epoch: &EpochData,
    params: &EpochParams,
    now_millis: u64,
) -> Result<bool, FreshnessError> {
    let start = epoch.start_time_millis();
    let duration = params.epoch_duration_millis;
    let end = start.checked_add(duration);
    match end {
        Some(end) if duration > 0 => Ok(now_millis < end),
        _ => Err(FreshnessError::MalformedWindow(
            epoch.epoch(),
            start,
            duration,
        )),
    }
}
