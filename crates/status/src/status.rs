//! Lifecycle status snapshot types.

use meridian_state::epoch::EpochHandler;

/// Snapshot of the epoch lifecycle's health, refreshed after every tick.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EpochStatus {
    /// Epoch number the node is currently on.
    pub epoch: u64,

    /// Whether the current epoch has been finalized.
    pub finalized: bool,

    /// Whether the current alignment is activated.
    pub current_activated: bool,

    /// Whether a legacy alignment is still winding down.
    pub legacy_activated: bool,

    /// Consecutive finalization attempts that came up short.
    pub finalize_attempts: u32,

    /// Set when finalization has failed past the configured bound and the
    /// operator should look at the node.
    pub stalled: bool,
}

impl EpochStatus {
    /// Refreshes the fields derived from the consensus state root.
    pub fn update_from_handler(&mut self, handler: &EpochHandler) {
        self.epoch = handler.epoch_data().epoch();
        self.finalized = handler.epoch_data().is_finalized();
        self.current_activated = handler.current_alignment().activated();
        self.legacy_activated = handler.legacy_alignment().activated();
    }

    /// Records the retry counter and derives the stalled flag from the
    /// configured bound.
    pub fn set_finalize_attempts(&mut self, attempts: u32, max_attempts: u32) {
        self.finalize_attempts = attempts;
        self.stalled = attempts > max_attempts;
    }
}
