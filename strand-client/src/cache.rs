//! Connection cache keyed by chain identity.
//!
//! Partition connections are long-lived: one per destination chain,
//! shared by the plain client and any locked sessions it spawns. The
//! cache is the single place connect timeouts are applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strand_core::ReplicaChain;
use strand_rpc::{ChainConnection, ChainConnector, RpcError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ClientResult;

/// Cache of open connections, one per chain identity.
pub struct ConnectionCache {
    /// Factory for new connections.
    connector: Arc<dyn ChainConnector>,
    /// Upper bound on one connection attempt.
    connect_timeout: Duration,
    /// Open connections by chain identity. The lock is held across
    /// connects, so concurrent misses for the same chain dial once.
    entries: Mutex<HashMap<String, Arc<dyn ChainConnection>>>,
}

impl ConnectionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(connector: Arc<dyn ChainConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached connection for `chain`, dialing it on a miss.
    ///
    /// # Errors
    /// Returns an error if the dial fails or exceeds the connect timeout.
    pub async fn get_or_connect(
        &self,
        chain: &ReplicaChain,
    ) -> ClientResult<Arc<dyn ChainConnection>> {
        let identity = chain.identity();
        let mut entries = self.entries.lock().await;
        if let Some(connection) = entries.get(&identity) {
            return Ok(Arc::clone(connection));
        }

        let connection = tokio::time::timeout(self.connect_timeout, self.connector.connect(chain))
            .await
            .map_err(|_| RpcError::Timeout {
                operation: "connect",
                waited_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })??;
        debug!(chain = %identity, "opened partition connection");
        entries.insert(identity, Arc::clone(&connection));
        Ok(connection)
    }

    /// Drops the cached connection for one chain identity, if any.
    ///
    /// Call this after a transport failure so the next use redials.
    pub async fn invalidate(&self, identity: &str) {
        if self.entries.lock().await.remove(identity).is_some() {
            debug!(chain = %identity, "dropped partition connection");
        }
    }

    /// Drops every cached connection.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of open connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no connections.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
