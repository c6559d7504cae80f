use std::fmt;

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use meridian_primitives::buf::Buf32;

/// Identity of a block producer, derived from its public key.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Arbitrary, BorshSerialize,
    BorshDeserialize,
)]
pub struct ProducerId(Buf32);

impl ProducerId {
    pub fn zero() -> Self {
        Self(Buf32::zero())
    }
}

impl From<Buf32> for ProducerId {
    fn from(value: Buf32) -> Self {
        Self(value)
    }
}

impl From<ProducerId> for Buf32 {
    fn from(value: ProducerId) -> Self {
        value.0
    }
}

impl fmt::Debug for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// ID of a block as computed from its header fields.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Arbitrary, BorshSerialize,
    BorshDeserialize,
)]
pub struct BlockHash(Buf32);

impl BlockHash {
    pub fn zero() -> Self {
        Self(Buf32::zero())
    }
}

impl From<Buf32> for BlockHash {
    fn from(value: Buf32) -> Self {
        Self(value)
    }
}

impl From<BlockHash> for Buf32 {
    fn from(value: BlockHash) -> Self {
        value.0
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
