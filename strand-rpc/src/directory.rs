//! The directory (metadata) service seam.

use std::collections::HashMap;

use async_trait::async_trait;
use strand_core::{limits, DataStatus};

use crate::error::RpcResult;

/// Backing path used when the caller does not name one.
pub const DEFAULT_BACKING_PATH: &str = "local://tmp";

/// Full owner, group, and other permission bits.
pub const PERMISSIONS_ALL: u32 = 0o777;

/// Options for creating a data set.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Backing store path for dumps and loads.
    pub backing_path: String,
    /// Number of partitions to create.
    pub num_blocks: u32,
    /// Replication factor of each partition.
    pub chain_length: u32,
    /// Storage-service flags, passed through opaquely.
    pub flags: u32,
    /// Unix-style permission bits.
    pub permissions: u32,
    /// Free-form tags stored with the data set.
    pub tags: HashMap<String, String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            backing_path: DEFAULT_BACKING_PATH.to_string(),
            num_blocks: 1,
            chain_length: 1,
            flags: 0,
            permissions: PERMISSIONS_ALL,
            tags: HashMap::new(),
        }
    }
}

impl CreateOptions {
    /// Sets the backing store path.
    #[must_use]
    pub fn with_backing_path(mut self, backing_path: impl Into<String>) -> Self {
        self.backing_path = backing_path.into();
        self
    }

    /// Sets the number of partitions.
    ///
    /// # Panics
    ///
    /// Panics if `num_blocks` is zero or exceeds
    /// [`limits::PARTITIONS_MAX`].
    #[must_use]
    pub fn with_num_blocks(mut self, num_blocks: u32) -> Self {
        assert!(
            num_blocks > 0 && num_blocks <= limits::PARTITIONS_MAX,
            "num_blocks must be in 1..=PARTITIONS_MAX"
        );
        self.num_blocks = num_blocks;
        self
    }

    /// Sets the replication factor.
    ///
    /// # Panics
    ///
    /// Panics if `chain_length` is zero or exceeds
    /// [`limits::CHAIN_LENGTH_MAX`].
    #[must_use]
    pub fn with_chain_length(mut self, chain_length: u32) -> Self {
        assert!(
            chain_length > 0 && chain_length <= limits::CHAIN_LENGTH_MAX,
            "chain_length must be in 1..=CHAIN_LENGTH_MAX"
        );
        self.chain_length = chain_length;
        self
    }

    /// Sets the storage-service flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the permission bits.
    #[must_use]
    pub const fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Adds one tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// The metadata service owning the path namespace and partition tables.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Creates a data set at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path already exists or creation fails.
    async fn create(&self, path: &str, options: &CreateOptions) -> RpcResult<DataStatus>;

    /// Opens the data set at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RpcError::PathNotFound`] if the path does not exist.
    async fn open(&self, path: &str) -> RpcResult<DataStatus>;

    /// Opens `path`, creating it first if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    async fn open_or_create(&self, path: &str, options: &CreateOptions) -> RpcResult<DataStatus>;

    /// Returns the current status of `path`.
    ///
    /// This is the table-refresh call: the returned chain list is the
    /// authoritative partition table at the time of the call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RpcError::PathNotFound`] if the path does not exist.
    async fn dstatus(&self, path: &str) -> RpcResult<DataStatus>;

    /// Removes the data set at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or removal fails.
    async fn remove(&self, path: &str) -> RpcResult<()>;

    /// Removes every data set under the `path` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    async fn remove_all(&self, path: &str) -> RpcResult<()>;

    /// Renames `old_path` to `new_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `old_path` does not exist or `new_path` does.
    async fn rename(&self, old_path: &str, new_path: &str) -> RpcResult<()>;

    /// Flushes dirty data to the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or the flush fails.
    async fn sync(&self, path: &str, backing_path: &str) -> RpcResult<()>;

    /// Dumps the whole data set to the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or the dump fails.
    async fn dump(&self, path: &str, backing_path: &str) -> RpcResult<()>;

    /// Loads the data set from the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or the load fails.
    async fn load(&self, path: &str, backing_path: &str) -> RpcResult<()>;
}
