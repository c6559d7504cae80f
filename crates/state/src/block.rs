//! Block and transaction containers as this core sees them.
//!
//! Transaction payloads are opaque here; semantic execution lives behind the
//! applier collaborator.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use meridian_primitives::{buf::Buf32, hash::compute_borsh_hash};

use crate::id::{BlockHash, ProducerId};

/// A single transaction carried in a block payload.  The contents mean
/// nothing to the epoch core.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct Transaction {
    payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A proposed unit of work from a producer.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct Block {
    /// Producer that created the block.
    creator: ProducerId,

    /// Hash of the creator's chain tip this block claims to extend.
    prev_hash: BlockHash,

    /// Ordered transactions, applied in payload order on admission.
    payload: Vec<Transaction>,
}

/// Fields we commit to when computing a block's ID.
#[derive(BorshSerialize)]
struct HashedBlockHeader {
    creator: Buf32,
    prev_hash: Buf32,
    payload_hash: Buf32,
}

impl Block {
    pub fn new(creator: ProducerId, prev_hash: BlockHash, payload: Vec<Transaction>) -> Self {
        Self {
            creator,
            prev_hash,
            payload,
        }
    }

    pub fn creator(&self) -> &ProducerId {
        &self.creator
    }

    pub fn prev_hash(&self) -> &BlockHash {
        &self.prev_hash
    }

    pub fn payload(&self) -> &[Transaction] {
        &self.payload
    }

    /// Computes the block's own ID from its header fields.
    pub fn compute_hash(&self) -> BlockHash {
        let hashed = HashedBlockHeader {
            creator: self.creator.into(),
            prev_hash: self.prev_hash.into(),
            payload_hash: compute_borsh_hash(&self.payload),
        };
        BlockHash::from(compute_borsh_hash(&hashed))
    }
}
