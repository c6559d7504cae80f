//! Epoch lifecycle state: the unit of consensus scheduling.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use crate::alignment::{AlignmentData, BlockPosition, ProgressError};
use crate::exec_state::ExecutionState;
use crate::id::{BlockHash, ProducerId};

/// Assignment the external policy supplies for one epoch.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct EpochAssignment {
    leader: ProducerId,
    verifier: ProducerId,
    expected_producers: Vec<ProducerId>,
}

impl EpochAssignment {
    pub fn new(
        leader: ProducerId,
        verifier: ProducerId,
        expected_producers: Vec<ProducerId>,
    ) -> Self {
        Self {
            leader,
            verifier,
            expected_producers,
        }
    }

    pub fn leader(&self) -> &ProducerId {
        &self.leader
    }

    pub fn verifier(&self) -> &ProducerId {
        &self.verifier
    }

    pub fn expected_producers(&self) -> &[ProducerId] {
        &self.expected_producers
    }

    pub fn into_parts(self) -> (ProducerId, ProducerId, Vec<ProducerId>) {
        (self.leader, self.verifier, self.expected_producers)
    }
}

/// Handler passed to finalization and rotation; owned exclusively by the
/// epoch lifecycle.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct EpochData {
    /// Epoch number, starting from 0 at genesis.
    epoch: u64,

    /// When this epoch's window opened.
    start_time_millis: u64,

    /// Chain index every expected producer must have finalized for this
    /// epoch to be closeable.
    finality_target: u64,

    /// Set once the epoch's window has elapsed and finalization ran.
    finalized: bool,
}

impl EpochData {
    pub fn new(epoch: u64, start_time_millis: u64, finality_target: u64) -> Self {
        Self {
            epoch,
            start_time_millis,
            finality_target,
            finalized: false,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn start_time_millis(&self) -> u64 {
        self.start_time_millis
    }

    pub fn finality_target(&self) -> u64 {
        self.finality_target
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Marks the epoch finalized, returning if it was newly finalized.
    /// Calling this again on a finalized epoch changes nothing.
    pub fn mark_finalized(&mut self) -> bool {
        let newly = !self.finalized;
        self.finalized = true;
        newly
    }
}

/// Root consensus state for the epoch machinery: the active epoch handler,
/// the legacy and current alignment data, and per-producer execution tips.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct EpochHandler {
    /// Alignment for an epoch being phased out while in-flight verification
    /// referencing it drains.
    legacy_alignment: AlignmentData,

    /// Alignment for the active epoch.
    current_alignment: AlignmentData,

    /// Scheduling data for the active epoch.
    epoch_data: EpochData,

    /// Per-producer chain tips, persisted across epoch transitions.
    execution_state: ExecutionState,
}

impl EpochHandler {
    /// Constructs the state as of node start: epoch 0 active, legacy slot
    /// empty, execution tips seeded for the initial producer set.
    pub fn from_genesis(
        assignment: EpochAssignment,
        genesis_time_millis: u64,
        finality_target: u64,
    ) -> Self {
        let execution_state =
            ExecutionState::with_producers(assignment.expected_producers().iter().copied());
        Self {
            legacy_alignment: AlignmentData::new_inactive(),
            current_alignment: AlignmentData::from_assignment(assignment),
            epoch_data: EpochData::new(0, genesis_time_millis, finality_target),
            execution_state,
        }
    }

    /// Reconstructs state from previously persisted parts.  This is the seam
    /// the external storage collaborator restores through after a restart.
    pub fn from_parts(
        legacy_alignment: AlignmentData,
        current_alignment: AlignmentData,
        epoch_data: EpochData,
        execution_state: ExecutionState,
    ) -> Self {
        Self {
            legacy_alignment,
            current_alignment,
            epoch_data,
            execution_state,
        }
    }

    pub fn legacy_alignment(&self) -> &AlignmentData {
        &self.legacy_alignment
    }

    pub fn current_alignment(&self) -> &AlignmentData {
        &self.current_alignment
    }

    pub fn epoch_data(&self) -> &EpochData {
        &self.epoch_data
    }

    pub fn execution_state(&self) -> &ExecutionState {
        &self.execution_state
    }

    /// Both alignments active at once means the consensus state is corrupted
    /// and the lifecycle must stop rather than keep ticking on it.
    pub fn both_alignments_activated(&self) -> bool {
        self.legacy_alignment.activated() && self.current_alignment.activated()
    }

    /// Records finality progress against the current alignment.
    pub fn record_progress(
        &mut self,
        producer: ProducerId,
        index: u64,
        hash: BlockHash,
    ) -> Result<(), ProgressError> {
        self.current_alignment.record_progress(producer, index, hash)
    }

    /// Installs a producer's new execution tip.
    pub fn set_execution_tip(&mut self, producer: ProducerId, position: BlockPosition) {
        self.execution_state.set_tip(producer, position);
    }

    /// Seeds a tip for a producer unknown so far.  This is the seam for the
    /// external genesis/bootstrap path.  Returns if the producer was new.
    pub fn bootstrap_producer(&mut self, producer: ProducerId, position: BlockPosition) -> bool {
        self.execution_state.insert_if_absent(producer, position)
    }

    /// Marks the current epoch finalized.  Idempotent; returns if it was
    /// newly finalized.
    pub fn finalize_current(&mut self) -> bool {
        self.epoch_data.mark_finalized()
    }

    /// Replaces the active epoch with a freshly assigned one.  The finalized
    /// alignment moves into the legacy slot, still activated, until
    /// stragglers drain; committed progress in it is retained untouched.  The
    /// incoming alignment stays pending until the drain so that only one
    /// alignment is ever activated.  Execution tips carry over.
    pub fn rotate(&mut self, assignment: EpochAssignment, now_millis: u64, finality_target: u64) {
        let old = std::mem::replace(
            &mut self.current_alignment,
            AlignmentData::new_pending(assignment),
        );
        self.legacy_alignment = old;
        self.epoch_data =
            EpochData::new(self.epoch_data.epoch() + 1, now_millis, finality_target);
    }

    /// Discards the legacy alignment once in-flight verification referencing
    /// it has completed, activating the pending epoch in its place.  Driven
    /// by the external verifier.
    pub fn drain_legacy(&mut self) {
        self.legacy_alignment = AlignmentData::new_inactive();
        self.current_alignment.activate();
    }
}
