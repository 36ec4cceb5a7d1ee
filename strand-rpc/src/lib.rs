//! Strand RPC - the contract between the strand client and its cluster.
//!
//! This crate defines everything both sides must agree on: command opcodes,
//! the key-to-slot hash, the control-sentinel vocabulary, and the service
//! traits for the directory, the lease service, and per-partition command
//! connections. It also ships [`SimulatedCluster`], a deterministic
//! in-memory implementation of all three services used to exercise every
//! protocol path (redirects, stale tables, locks, lease renewal) in tests
//! without a real cluster.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod command;
mod connection;
mod directory;
mod error;
mod hash;
mod lease;
pub mod sentinel;
mod sim;

pub use command::CommandId;
pub use connection::{ChainConnection, ChainConnector};
pub use directory::{CreateOptions, DirectoryService, DEFAULT_BACKING_PATH, PERMISSIONS_ALL};
pub use error::{RpcError, RpcResult};
pub use hash::slot_hash;
pub use lease::{LeaseAck, LeaseService};
pub use sentinel::{LockAck, Signal};
pub use sim::SimulatedCluster;
