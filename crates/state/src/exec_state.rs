//! Per-producer execution tips.
//!
//! This table is the sole source of truth for chain-extension checks: an
//! entry's hash always equals the hash of the last block admitted for that
//! producer.

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use crate::alignment::BlockPosition;
use crate::id::ProducerId;

#[derive(Clone, Debug, Default, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct ExecutionState {
    producers: BTreeMap<ProducerId, BlockPosition>,
}

impl ExecutionState {
    pub fn new_empty() -> Self {
        Self {
            producers: BTreeMap::new(),
        }
    }

    /// Seeds genesis tips for an initial producer set.
    pub fn with_producers(producers: impl IntoIterator<Item = ProducerId>) -> Self {
        Self {
            producers: producers
                .into_iter()
                .map(|p| (p, BlockPosition::genesis()))
                .collect(),
        }
    }

    /// Looks up a producer's tip.  A miss means the producer is unknown to
    /// this core and must go through the external bootstrap path first.
    pub fn tip(&self, producer: &ProducerId) -> Option<&BlockPosition> {
        self.producers.get(producer)
    }

    pub fn contains_producer(&self, producer: &ProducerId) -> bool {
        self.producers.contains_key(producer)
    }

    pub fn set_tip(&mut self, producer: ProducerId, position: BlockPosition) {
        self.producers.insert(producer, position);
    }

    /// Inserts a tip only if the producer is unknown, returning whether the
    /// insert happened.
    pub fn insert_if_absent(&mut self, producer: ProducerId, position: BlockPosition) -> bool {
        if self.producers.contains_key(&producer) {
            return false;
        }
        self.producers.insert(producer, position);
        true
    }

    pub fn producer_cnt(&self) -> usize {
        self.producers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProducerId, &BlockPosition)> {
        self.producers.iter()
    }
}
