// Reexports from elsewhere in the crate.

pub use crate::alignment::{AlignmentData, BlockPosition, ProgressError};
pub use crate::block::{Block, Transaction};
pub use crate::epoch::{EpochAssignment, EpochData, EpochHandler};
pub use crate::exec_state::ExecutionState;
pub use crate::id::{BlockHash, ProducerId};
