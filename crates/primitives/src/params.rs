//! Global consensus parameters for the chain.

/// Epoch scheduling parameters that don't change for the lifetime of the
/// network (unless there's some weird hard fork).
#[derive(Clone, Debug)]
pub struct EpochParams {
    /// Length of an epoch's window in milliseconds.
    pub epoch_duration_millis: u64,

    /// Progress every expected producer must make past the epoch's starting
    /// baseline before the epoch counts as complete.
    pub finality_depth: u64,
}

/// Node-local parameters that are used to make the network work but don't
/// strictly have to be pre-agreed.  These have to do with grace periods in
/// lifecycle retries and whatnot.
#[derive(Clone, Debug)]
pub struct RunParams {
    /// Number of consecutive failed finalization attempts after which the
    /// epoch is reported as stalled.
    pub max_finalize_attempts: u32,
}

/// Combined set of parameters across all the consensus logic.
#[derive(Clone, Debug)]
pub struct Params {
    pub epoch: EpochParams,
    pub run: RunParams,
}

impl Params {
    pub fn epoch(&self) -> &EpochParams {
        &self.epoch
    }

    pub fn run(&self) -> &RunParams {
        &self.run
    }
}
