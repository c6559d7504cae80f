use meridian_state::alignment::ProgressError;
use thiserror::Error;

use crate::freshness::FreshnessError;
use crate::traits::ApplyError;

/// Invariant violations that permanently stop the lifecycle from ticking on
/// this node until operator intervention.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum HaltReason {
    #[error("both legacy and current alignment activated in epoch {0}")]
    BothAlignmentsActive(u64),

    #[error("malformed epoch window in epoch {0}")]
    MalformedWindow(u64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("lifecycle halted: {0}")]
    Halted(HaltReason),

    #[error("freshness: {0}")]
    Freshness(#[from] FreshnessError),

    #[error("progress: {0}")]
    Progress(#[from] ProgressError),

    #[error("apply: {0}")]
    Apply(#[from] ApplyError),
}
