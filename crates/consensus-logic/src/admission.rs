//! Chain-of-custody block admission.
//!
//! A block is admitted only if it extends its producer's recorded tip; on
//! acceptance the payload is applied in order and the tip advanced, all or
//! nothing.

use std::sync::Arc;

use tracing::*;

use meridian_state::alignment::BlockPosition;
use meridian_state::block::Block;
use meridian_state::id::BlockHash;

use crate::errors::Error;
use crate::store::ConsensusStateStore;
use crate::traits::TransactionApplier;

/// Why a block was not admitted.  These are normal results, not failures;
/// a rejected block simply leaves no trace.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// The producer has no recorded tip.  A first block has to come in
    /// through the external genesis/bootstrap path instead.
    NoPriorState,

    /// The block does not extend the producer's recorded tip, which means a
    /// fork or a replay.
    HashMismatch {
        expected: BlockHash,
        got: BlockHash,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdmissionOutcome {
    /// Block admitted; the producer's chain now ends at this position.
    Accepted(BlockPosition),

    /// Block refused, nothing mutated.
    Rejected(RejectReason),
}

impl AdmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Validates incoming blocks against the shared consensus state and runs the
/// admission pipeline for the ones that extend their producer's chain.
pub struct ChainAdmitter<X> {
    store: Arc<ConsensusStateStore>,
    applier: X,
}

impl<X: TransactionApplier> ChainAdmitter<X> {
    pub fn new(store: Arc<ConsensusStateStore>, applier: X) -> Self {
        Self { store, applier }
    }

    pub fn store(&self) -> &Arc<ConsensusStateStore> {
        &self.store
    }

    /// Admits a block if it extends its producer's recorded tip.
    ///
    /// Competing admissions for the same producer serialize on the
    /// per-producer lock, so of two blocks claiming the same parent exactly
    /// one gets in.  The payload is applied outside any state lock; a fatal
    /// applier error aborts the block with the tip untouched.
    pub fn admit(&self, block: &Block) -> Result<AdmissionOutcome, Error> {
        let creator = *block.creator();
        let admission_lock = self.store.producer_admission_lock(&creator);
        let _guard = admission_lock.lock();

        // Read phase: chain-of-custody check against the recorded tip.
        let cur_tip = self
            .store
            .with_state(|s| s.execution_state().tip(&creator).copied());
        let Some(cur_tip) = cur_tip else {
            debug!(%creator, "rejecting block from unknown producer");
            return Ok(AdmissionOutcome::Rejected(RejectReason::NoPriorState));
        };
        if cur_tip.hash() != block.prev_hash() {
            warn!(
                %creator,
                expected = %cur_tip.hash(),
                got = %block.prev_hash(),
                "rejecting block that does not extend the recorded tip"
            );
            return Ok(AdmissionOutcome::Rejected(RejectReason::HashMismatch {
                expected: *cur_tip.hash(),
                got: *block.prev_hash(),
            }));
        }

        // Apply the payload in order before taking the exclusive section;
        // the applier may block and must never run under a state lock.
        for tx in block.payload() {
            self.applier.apply(tx)?;
        }

        // Commit phase: progress and tip move together or not at all.
        let new_tip = BlockPosition::new(cur_tip.index() + 1, block.compute_hash());
        {
            let mut state = self.store.write();

            // The producer lock pins the tip between the check above and
            // here; re-validate under the write lock anyway, per the store's
            // discipline.
            match state.execution_state().tip(&creator).copied() {
                Some(tip) if tip == cur_tip => {}
                Some(tip) => {
                    warn!(%creator, "tip moved during admission, rejecting block");
                    return Ok(AdmissionOutcome::Rejected(RejectReason::HashMismatch {
                        expected: *tip.hash(),
                        got: *block.prev_hash(),
                    }));
                }
                None => {
                    return Ok(AdmissionOutcome::Rejected(RejectReason::NoPriorState));
                }
            }

            state.record_progress(creator, new_tip.index(), *new_tip.hash())?;
            state.set_execution_tip(creator, new_tip);
        }

        debug!(%creator, index = %new_tip.index(), "admitted block");
        Ok(AdmissionOutcome::Accepted(new_tip))
    }
}
