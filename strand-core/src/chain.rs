//! Replica-chain descriptors and the directory's per-path data status.

use std::collections::HashMap;

use crate::limits;
use crate::slot::SlotRange;

/// How a partition currently stores its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageMode {
    /// Resident in memory.
    #[default]
    InMemory,
    /// In memory and over its capacity watermark.
    InMemoryGrace,
    /// Dumped to the backing store.
    OnDisk,
    /// On the backing store and over its capacity watermark.
    OnDiskGrace,
}

/// One partition of a data set: an ordered chain of replica blocks.
///
/// Writes enter at the head block and reads are served by the tail.
/// A chain is identified by its block names; slot assignment and storage
/// mode are metadata that routing does not rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaChain {
    /// Replica block names, head first.
    pub blocks: Vec<String>,
    /// The slot range this chain is responsible for.
    pub slots: SlotRange,
    /// Current storage mode.
    pub mode: StorageMode,
}

impl ReplicaChain {
    /// Creates a chain descriptor.
    ///
    /// # Panics
    ///
    /// Panics if `blocks` is empty or longer than
    /// [`limits::CHAIN_LENGTH_MAX`].
    #[must_use]
    pub fn new(blocks: Vec<String>, slots: SlotRange, mode: StorageMode) -> Self {
        assert!(!blocks.is_empty(), "a chain must have at least one block");
        assert!(
            blocks.len() <= limits::CHAIN_LENGTH_MAX as usize,
            "chain length exceeds CHAIN_LENGTH_MAX"
        );
        Self { blocks, slots, mode }
    }

    /// Builds a descriptor from replica names alone.
    ///
    /// Used for chains learned from a redirect, where the slot assignment
    /// is not known to the client; only the identity matters.
    ///
    /// # Panics
    ///
    /// Panics if `blocks` is empty or longer than
    /// [`limits::CHAIN_LENGTH_MAX`].
    #[must_use]
    pub fn from_blocks(blocks: Vec<String>) -> Self {
        Self::new(blocks, SlotRange::full(), StorageMode::InMemory)
    }

    /// The chain's identity: its block names joined with `!`.
    ///
    /// Two descriptors with the same identity address the same partition,
    /// whatever their slot or mode metadata says.
    #[must_use]
    pub fn identity(&self) -> String {
        self.blocks.join("!")
    }

    /// The head block, where writes enter.
    #[must_use]
    pub fn head(&self) -> &str {
        &self.blocks[0]
    }

    /// The tail block, which serves reads.
    #[must_use]
    pub fn tail(&self) -> &str {
        &self.blocks[self.blocks.len() - 1]
    }
}

/// The directory's record of one stored data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStatus {
    /// Where the data set persists when dumped.
    pub backing_path: String,
    /// Replication factor of each chain.
    pub chain_length: u32,
    /// Partitions in ascending slot order.
    pub chains: Vec<ReplicaChain>,
    /// Storage-service flags, passed through opaquely.
    pub flags: u32,
    /// Free-form tags attached at creation.
    pub tags: HashMap<String, String>,
}

impl DataStatus {
    /// Creates a status record with no flags or tags.
    #[must_use]
    pub fn new(backing_path: impl Into<String>, chain_length: u32, chains: Vec<ReplicaChain>) -> Self {
        Self {
            backing_path: backing_path.into(),
            chain_length,
            chains,
            flags: 0,
            tags: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(names: &[&str]) -> ReplicaChain {
        ReplicaChain::new(
            names.iter().map(ToString::to_string).collect(),
            SlotRange::full(),
            StorageMode::InMemory,
        )
    }

    #[test]
    fn test_identity_joins_block_names() {
        let c = chain(&["host1:9090:0", "host2:9090:0"]);
        assert_eq!(c.identity(), "host1:9090:0!host2:9090:0");
    }

    #[test]
    fn test_head_and_tail() {
        let c = chain(&["a", "b", "c"]);
        assert_eq!(c.head(), "a");
        assert_eq!(c.tail(), "c");

        let single = chain(&["only"]);
        assert_eq!(single.head(), single.tail());
    }

    #[test]
    fn test_identity_ignores_metadata() {
        let a = ReplicaChain::new(
            vec!["x".to_string()],
            SlotRange::new(0, 100),
            StorageMode::OnDisk,
        );
        let b = ReplicaChain::from_blocks(vec!["x".to_string()]);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    #[should_panic(expected = "at least one block")]
    fn test_empty_chain_rejected() {
        let _ = ReplicaChain::from_blocks(Vec::new());
    }

    #[test]
    fn test_data_status_defaults() {
        let status = DataStatus::new("local://tmp", 1, vec![chain(&["b0"])]);
        assert_eq!(status.backing_path, "local://tmp");
        assert_eq!(status.chain_length, 1);
        assert_eq!(status.chains.len(), 1);
        assert_eq!(status.flags, 0);
        assert!(status.tags.is_empty());
    }
}
