//! Client-side routing and consistency layer for strand data sets.
//!
//! A data set is partitioned over a fixed 32-bit hash space and served by
//! replica chains that the cluster reshards while clients keep running.
//! This crate owns everything a caller needs to stay correct through that:
//!
//! - [`PartitionTable`]: immutable snapshot of the hash-range layout,
//!   routing keys to chains by greatest lower bound over slot begins.
//! - [`KvClient`]: per-data-set handle exposing single-key and batched
//!   operations. It follows `"!exporting"` redirects transparently,
//!   refreshes its table on `"!block_moved"`, and restarts the operation,
//!   bounded by [`ClientConfig::table_refresh_limit`].
//! - [`LockedSession`]: multi-key consistency scope that locks every
//!   partition in the table (plus any migration successors discovered
//!   from lock acknowledgements) before issuing locked commands.
//! - [`LeaseWorker`]: background task renewing the client's path leases
//!   on the cadence the lease service advertises.
//! - [`StoreClient`]: entry point tying the directory service, lease
//!   worker, and per-data-set clients together.
//!
//! Wire contracts (opcodes, sentinels, service traits) live in
//! `strand-rpc`; this crate turns them into an application-facing API
//! where no sentinel string ever reaches the caller.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod chain;
mod client;
mod config;
mod error;
mod kv;
mod lease;
mod locked;
mod table;

pub use cache::ConnectionCache;
pub use chain::{ChainClient, LockedChain};
pub use client::StoreClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use kv::KvClient;
pub use lease::LeaseWorker;
pub use locked::LockedSession;
pub use table::PartitionTable;
