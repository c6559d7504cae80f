// Reexports from elsewhere in the crate.

pub use crate::buf::Buf32;
pub use crate::params::{EpochParams, Params, RunParams};
