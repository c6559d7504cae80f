//! Per-epoch alignment data: the leader/verifier assignment and how far each
//! producer's chain has been finalized within the epoch.

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;
use tracing::*;

use crate::epoch::EpochAssignment;
use crate::id::{BlockHash, ProducerId};

/// Position on a single producer's chain.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct BlockPosition {
    index: u64,
    hash: BlockHash,
}

impl BlockPosition {
    pub fn new(index: u64, hash: BlockHash) -> Self {
        Self { index, hash }
    }

    /// Position a producer starts from before any block has been admitted.
    pub fn genesis() -> Self {
        Self {
            index: 0,
            hash: BlockHash::zero(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProgressError {
    /// Progress updates must move strictly forward per producer.  Hitting
    /// this means a duplicate delivery or a misbehaving producer.
    #[error("progress for {0} at index {1} not beyond recorded index {2}")]
    StaleProgress(ProducerId, u64, u64),
}

/// Describes one epoch's assignment and the finality progress made under it.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct AlignmentData {
    /// Whether this alignment is the one blocks are currently judged against.
    activated: bool,

    /// Producer scheduled to propose this epoch.
    current_leader: ProducerId,

    /// Party attesting the leader's output this epoch.
    current_to_verify: ProducerId,

    /// Producers expected to participate this epoch.
    expected_producers: Vec<ProducerId>,

    /// Per-producer finalized chain position within this epoch.
    final_block_progress: BTreeMap<ProducerId, BlockPosition>,
}

impl AlignmentData {
    /// Constructs an empty, deactivated instance, used for the legacy slot
    /// before any rotation has happened.
    pub fn new_inactive() -> Self {
        Self {
            activated: false,
            current_leader: ProducerId::zero(),
            current_to_verify: ProducerId::zero(),
            expected_producers: Vec::new(),
            final_block_progress: BTreeMap::new(),
        }
    }

    /// Constructs an activated instance from a fresh assignment, with empty
    /// progress.
    pub fn from_assignment(assignment: EpochAssignment) -> Self {
        let mut data = Self::new_pending(assignment);
        data.activated = true;
        data
    }

    /// Constructs a not-yet-activated instance from an assignment.  Used as
    /// the rotation target while the previous epoch's alignment winds down in
    /// the legacy slot; at most one alignment may be activated at a time.
    pub fn new_pending(assignment: EpochAssignment) -> Self {
        let (leader, verifier, expected) = assignment.into_parts();
        Self {
            activated: false,
            current_leader: leader,
            current_to_verify: verifier,
            expected_producers: expected,
            final_block_progress: BTreeMap::new(),
        }
    }

    pub fn activated(&self) -> bool {
        self.activated
    }

    pub fn activate(&mut self) {
        self.activated = true;
    }

    pub fn deactivate(&mut self) {
        self.activated = false;
    }

    pub fn current_leader(&self) -> &ProducerId {
        &self.current_leader
    }

    pub fn current_to_verify(&self) -> &ProducerId {
        &self.current_to_verify
    }

    pub fn expected_producers(&self) -> &[ProducerId] {
        &self.expected_producers
    }

    pub fn progress_for(&self, producer: &ProducerId) -> Option<&BlockPosition> {
        self.final_block_progress.get(producer)
    }

    /// Records that `producer`'s chain has been finalized up to the given
    /// position within this epoch.  The index must be strictly greater than
    /// anything recorded for the producer so far.
    pub fn record_progress(
        &mut self,
        producer: ProducerId,
        index: u64,
        hash: BlockHash,
    ) -> Result<(), ProgressError> {
        if let Some(prev) = self.final_block_progress.get(&producer) {
            if index <= prev.index() {
                warn!(%producer, %index, prev_index = %prev.index(), "rejecting stale progress");
                return Err(ProgressError::StaleProgress(producer, index, prev.index()));
            }
        }

        self.final_block_progress
            .insert(producer, BlockPosition::new(index, hash));
        Ok(())
    }

    /// Returns if every expected producer has recorded progress at or beyond
    /// the epoch's finality target.
    pub fn is_epoch_complete(&self, finality_target: u64) -> bool {
        self.expected_producers.iter().all(|p| {
            self.final_block_progress
                .get(p)
                .is_some_and(|pos| pos.index() >= finality_target)
        })
    }

    /// Expected producers that have not yet reached the finality target.
    pub fn missing_producers(&self, finality_target: u64) -> Vec<ProducerId> {
        self.expected_producers
            .iter()
            .filter(|p| {
                !self
                    .final_block_progress
                    .get(p)
                    .is_some_and(|pos| pos.index() >= finality_target)
            })
            .copied()
            .collect()
    }
}
