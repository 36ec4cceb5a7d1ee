//! Strand Core - shared data model for the strand client.
//!
//! This crate defines the value types every other strand crate speaks in:
//! slot ranges over the key-hash space, replica-chain descriptors, storage
//! modes, and the directory's per-path data status. It is intentionally
//! dependency-free; protocol traits and wire handling live in `strand-rpc`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod chain;
mod slot;

pub use chain::{DataStatus, ReplicaChain, StorageMode};
pub use slot::{SlotRange, SLOT_MAX};

/// Bounds on cluster shapes the client will accept.
pub mod limits {
    /// Maximum number of partitions in one data set's table.
    pub const PARTITIONS_MAX: u32 = 65_536;

    /// Maximum replication factor of a single chain.
    pub const CHAIN_LENGTH_MAX: u32 = 8;
}
