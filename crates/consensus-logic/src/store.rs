//! Shared, lock-guarded root of the consensus state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::*;

use meridian_state::alignment::{BlockPosition, ProgressError};
use meridian_state::epoch::EpochHandler;
use meridian_state::id::{BlockHash, ProducerId};

use crate::errors::HaltReason;

/// Owns the [`EpochHandler`] behind a readers-writer lock, plus the
/// per-producer admission locks and the lifecycle halt flag.
///
/// Lock discipline: readers take the shared lock and may run concurrently;
/// every mutation takes the exclusive lock, acquired read-then-upgrade (drop
/// the read guard, take the write guard, re-validate the decision).  Never
/// nest exclusive acquisitions, and never block on external I/O while a
/// guard is held; anything needed from a collaborator gets fetched first.
pub struct ConsensusStateStore {
    state: RwLock<EpochHandler>,

    /// One lock per producer so that competing admissions for the same chain
    /// serialize while different producers proceed in parallel.
    admission_locks: Mutex<BTreeMap<ProducerId, Arc<Mutex<()>>>>,

    /// Set on the first invariant violation; ticking refuses afterwards.
    halt: Mutex<Option<HaltReason>>,
}

impl ConsensusStateStore {
    pub fn new(handler: EpochHandler) -> Self {
        Self {
            state: RwLock::new(handler),
            admission_locks: Mutex::new(BTreeMap::new()),
            halt: Mutex::new(None),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, EpochHandler> {
        self.state.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, EpochHandler> {
        self.state.write()
    }

    /// Runs a closure over the state under the shared lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&EpochHandler) -> R) -> R {
        f(&self.state.read())
    }

    pub(crate) fn producer_admission_lock(&self, producer: &ProducerId) -> Arc<Mutex<()>> {
        let mut locks = self.admission_locks.lock();
        locks.entry(*producer).or_default().clone()
    }

    pub fn halted(&self) -> Option<HaltReason> {
        *self.halt.lock()
    }

    pub(crate) fn set_halted(&self, reason: HaltReason) {
        let mut halt = self.halt.lock();
        // The first violation wins; later ones would just repeat it.
        if halt.is_none() {
            *halt = Some(reason);
        }
    }

    /// Seeds an execution tip for a producer this core has never seen.  This
    /// is the seam the external genesis/bootstrap path installs new
    /// producers through.  Returns if the producer was new.
    pub fn bootstrap_producer(&self, producer: ProducerId, position: BlockPosition) -> bool {
        let inserted = self.state.write().bootstrap_producer(producer, position);
        if inserted {
            info!(%producer, "bootstrapped producer tip");
        }
        inserted
    }

    /// Records finality progress for a producer against the current epoch's
    /// alignment.  Verifiers call this as attestation results land; stale
    /// updates come back as [`ProgressError::StaleProgress`].
    pub fn record_progress(
        &self,
        producer: ProducerId,
        index: u64,
        hash: BlockHash,
    ) -> Result<(), ProgressError> {
        self.state.write().record_progress(producer, index, hash)
    }

    /// Discards the legacy alignment and activates the pending epoch.
    /// Called by the external verifier once in-flight verification
    /// referencing the old epoch has completed.
    pub fn drain_legacy_epoch(&self) {
        let mut state = self.state.write();
        state.drain_legacy();
        let epoch = state.epoch_data().epoch();
        drop(state);
        info!(%epoch, "drained legacy epoch alignment");
    }
}
