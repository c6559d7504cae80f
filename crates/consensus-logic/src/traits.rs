//! Seams for the collaborators this core consumes but does not own:
//! transaction application, epoch assignment, the time reference, and the
//! rotation gate.

use std::time::{SystemTime, UNIX_EPOCH};

use meridian_state::block::Transaction;
use meridian_state::epoch::EpochAssignment;
use thiserror::Error;

use crate::epoch_worker::FinalizeOutcome;

/// Failure from the transaction applier.  Any of these aborts the containing
/// block; the tip is only advanced when the whole payload applied.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("transaction apply failed: {0}")]
pub struct ApplyError(String);

impl ApplyError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Applies a transaction's effects once its block is admitted.  Semantics of
/// the payload are entirely this collaborator's business.
pub trait TransactionApplier {
    fn apply(&self, tx: &Transaction) -> Result<(), ApplyError>;
}

/// Supplies the leader/verifier assignment and expected producer set for an
/// epoch.  Must be a pure lookup; it gets called before the exclusive
/// section, never under it.
pub trait AssignmentPolicy {
    fn assign(&self, epoch: u64) -> EpochAssignment;
}

/// The node's time reference used for freshness evaluation.
pub trait TimeSource {
    fn now_millis(&self) -> u64;
}

/// Wall-clock time source used outside of tests.
#[derive(Copy, Clone, Debug, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time: before unix epoch")
            .as_millis() as u64
    }
}

/// Decides whether a finalization attempt's result should trigger rotation
/// to the next epoch.
pub trait RotationPolicy {
    fn should_rotate(&self, finalize: &FinalizeOutcome, epoch_complete: bool) -> bool;
}

/// Default rotation gate: the finalization attempt succeeded and every
/// expected producer reached the finality target.
#[derive(Copy, Clone, Debug, Default)]
pub struct FinalizeAndComplete;

impl RotationPolicy for FinalizeAndComplete {
    fn should_rotate(&self, finalize: &FinalizeOutcome, epoch_complete: bool) -> bool {
        finalize.is_success() && epoch_complete
    }
}
