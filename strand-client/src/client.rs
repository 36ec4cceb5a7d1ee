//! Store-level entry point.
//!
//! A [`StoreClient`] owns the directory and lease plumbing shared by
//! every data set: it opens paths into [`KvClient`]s, keeps their
//! leases renewed through one [`LeaseWorker`], and forwards storage
//! management calls. Each opened [`KvClient`] gets its own connection
//! cache so one data set's connection churn never evicts another's.

use std::sync::Arc;

use strand_core::DataStatus;
use strand_rpc::{ChainConnector, CreateOptions, DirectoryService, LeaseService};
use tracing::info;

use crate::cache::ConnectionCache;
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::kv::KvClient;
use crate::lease::LeaseWorker;
use crate::table::PartitionTable;

/// Entry point for a store: opens data sets and manages their leases.
pub struct StoreClient {
    directory: Arc<dyn DirectoryService>,
    connector: Arc<dyn ChainConnector>,
    lease: LeaseWorker,
    config: ClientConfig,
}

impl StoreClient {
    /// Connects to a store.
    ///
    /// Validates the configuration and starts the lease renewal worker;
    /// a failed startup probe surfaces here rather than later in the
    /// background.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the lease
    /// probe fails.
    pub async fn connect(
        directory: Arc<dyn DirectoryService>,
        lease: Arc<dyn LeaseService>,
        connector: Arc<dyn ChainConnector>,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        config.validate()?;
        let worker = LeaseWorker::start(lease, config.lease_period).await?;
        Ok(Self {
            directory,
            connector,
            lease: worker,
            config,
        })
    }

    /// The lease renewal worker.
    #[must_use]
    pub fn lease(&self) -> &LeaseWorker {
        &self.lease
    }

    /// Creates the data set at `path` and opens it.
    ///
    /// # Errors
    /// Returns an error if the path already exists or the returned
    /// partition table is malformed.
    pub async fn create(&self, path: &str, options: &CreateOptions) -> ClientResult<KvClient> {
        let status = self.directory.create(path, options).await?;
        info!(path, partitions = status.chains.len(), "created data set");
        self.attach(path, &status).await
    }

    /// Opens the existing data set at `path`.
    ///
    /// # Errors
    /// Returns an error if the path does not exist or the returned
    /// partition table is malformed.
    pub async fn open(&self, path: &str) -> ClientResult<KvClient> {
        let status = self.directory.open(path).await?;
        self.attach(path, &status).await
    }

    /// Opens the data set at `path`, creating it first if needed.
    ///
    /// # Errors
    /// Returns an error if creation fails or the returned partition
    /// table is malformed.
    pub async fn open_or_create(
        &self,
        path: &str,
        options: &CreateOptions,
    ) -> ClientResult<KvClient> {
        let status = self.directory.open_or_create(path, options).await?;
        self.attach(path, &status).await
    }

    /// Removes the data set at `path`.
    ///
    /// The lease registration goes first so the worker never renews a
    /// path mid-removal.
    ///
    /// # Errors
    /// Returns an error if the path does not exist.
    pub async fn remove(&self, path: &str) -> ClientResult<()> {
        self.lease.remove_path(path).await;
        self.directory.remove(path).await?;
        Ok(())
    }

    /// Removes every data set under the `path` prefix.
    ///
    /// # Errors
    /// Returns an error if the removal fails.
    pub async fn remove_all(&self, path: &str) -> ClientResult<()> {
        self.lease.remove_paths_with_prefix(path).await;
        self.directory.remove_all(path).await?;
        Ok(())
    }

    /// Renames `old_path` to `new_path`, carrying the lease
    /// registration across.
    ///
    /// # Errors
    /// Returns an error if the rename fails; the registration is left
    /// untouched in that case.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> ClientResult<()> {
        self.directory.rename(old_path, new_path).await?;
        self.lease.rename_path(old_path, new_path).await;
        Ok(())
    }

    /// Flushes dirty data for `path` to `backing_path`.
    ///
    /// # Errors
    /// Returns an error if the path does not exist.
    pub async fn sync(&self, path: &str, backing_path: &str) -> ClientResult<()> {
        self.directory.sync(path, backing_path).await?;
        Ok(())
    }

    /// Dumps the data set at `path` to `backing_path`.
    ///
    /// # Errors
    /// Returns an error if the path does not exist.
    pub async fn dump(&self, path: &str, backing_path: &str) -> ClientResult<()> {
        self.directory.dump(path, backing_path).await?;
        Ok(())
    }

    /// Loads the data set at `path` from `backing_path`.
    ///
    /// # Errors
    /// Returns an error if the path does not exist.
    pub async fn load(&self, path: &str, backing_path: &str) -> ClientResult<()> {
        self.directory.load(path, backing_path).await?;
        Ok(())
    }

    /// Stops renewing the lease for `path` without removing the data
    /// set. The cluster reclaims it once the lease lapses.
    pub async fn detach(&self, path: &str) {
        self.lease.remove_path(path).await;
    }

    /// Shuts the client down, stopping lease renewal.
    pub async fn close(self) {
        self.lease.stop().await;
    }

    async fn attach(&self, path: &str, status: &DataStatus) -> ClientResult<KvClient> {
        let table = PartitionTable::from_status(path, status)?;
        self.lease.add_path(path).await;
        let cache = Arc::new(ConnectionCache::new(
            Arc::clone(&self.connector),
            self.config.connect_timeout,
        ));
        Ok(KvClient::new(
            path.to_string(),
            Arc::clone(&self.directory),
            cache,
            table,
            self.config.clone(),
        ))
    }
}
