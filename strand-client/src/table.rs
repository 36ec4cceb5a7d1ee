//! Immutable partition table snapshots and key routing.
//!
//! A table is built once from a directory `DataStatus` and never mutated;
//! refreshing swaps in a whole new table behind an `Arc`. Routing is a
//! greatest-lower-bound search over the ascending slot begins, so a key
//! always lands on the partition whose range starts at or below its slot.

use strand_core::{limits, DataStatus, ReplicaChain};
use strand_rpc::slot_hash;

use crate::error::{ClientError, ClientResult};

/// One validated snapshot of a data set's hash-range layout.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    /// Data set path this table routes for.
    path: String,
    /// Replica chains in ascending slot order.
    chains: Vec<ReplicaChain>,
    /// First slot of each chain, ascending; `slot_begins[0] == 0`.
    slot_begins: Vec<u32>,
}

impl PartitionTable {
    /// Builds a table from a directory status.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidTable`] if the status has no
    /// partitions or more than [`limits::PARTITIONS_MAX`], does not
    /// start at slot 0, or is not strictly ascending by slot begin.
    pub fn from_status(path: impl Into<String>, status: &DataStatus) -> ClientResult<Self> {
        let path = path.into();
        if status.chains.is_empty() {
            return Err(ClientError::InvalidTable {
                path,
                message: "status lists no partitions".to_string(),
            });
        }
        if status.chains.len() > limits::PARTITIONS_MAX as usize {
            return Err(ClientError::InvalidTable {
                path,
                message: format!(
                    "status lists {} partitions, limit {}",
                    status.chains.len(),
                    limits::PARTITIONS_MAX
                ),
            });
        }

        let slot_begins: Vec<u32> = status.chains.iter().map(|chain| chain.slots.begin).collect();
        if slot_begins[0] != 0 {
            return Err(ClientError::InvalidTable {
                path,
                message: format!("first partition begins at slot {}, expected 0", slot_begins[0]),
            });
        }
        if !slot_begins.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(ClientError::InvalidTable {
                path,
                message: "slot begins are not strictly ascending".to_string(),
            });
        }

        Ok(Self {
            path,
            chains: status.chains.clone(),
            slot_begins,
        })
    }

    /// Index of the partition owning `slot`.
    #[must_use]
    pub fn partition_for(&self, slot: u32) -> usize {
        // Greatest lower bound over the ascending begins. The first begin
        // is 0, so every slot has one; Err(0) cannot occur.
        match self.slot_begins.binary_search(&slot) {
            Ok(index) => index,
            Err(index) => index - 1,
        }
    }

    /// Chain owning `slot`.
    #[must_use]
    pub fn route(&self, slot: u32) -> &ReplicaChain {
        &self.chains[self.partition_for(slot)]
    }

    /// Chain owning `key`'s slot.
    #[must_use]
    pub fn route_key(&self, key: &[u8]) -> &ReplicaChain {
        self.route(slot_hash(key))
    }

    /// Replica chains in ascending slot order.
    #[must_use]
    pub fn chains(&self) -> &[ReplicaChain] {
        &self.chains
    }

    /// Data set path this table routes for.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Always false; a valid table has at least one partition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
