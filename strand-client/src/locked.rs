//! Multi-key consistency sessions over locked partitions.
//!
//! A session locks every partition in its table snapshot before issuing
//! any locked command, so multi-key work observes one frozen layout.
//! Lock acknowledgements from mid-export partitions name their
//! migration successors; those are locked too (once each), as *extras*
//! beyond the snapshot. Discovery happens entirely at construction:
//! once commands flow, every partition a key can live on is already
//! held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strand_core::ReplicaChain;
use strand_rpc::sentinel::{self, Signal};
use strand_rpc::CommandId;
use tracing::{debug, warn};

use crate::cache::ConnectionCache;
use crate::chain::{ChainClient, LockedChain};
use crate::error::{ClientError, ClientResult};
use crate::kv::{decode_count, decode_put, decode_value, single_response};
use crate::table::PartitionTable;

/// A held set of partition locks plus the table snapshot they froze.
pub struct LockedSession {
    /// Table snapshot the session routes by.
    table: Arc<PartitionTable>,
    /// Connection cache shared with the owning client; failed exchanges
    /// evict through it.
    cache: Arc<ConnectionCache>,
    /// Locked handles by chain identity: every table partition plus any
    /// discovered migration successors.
    handles: HashMap<String, LockedChain>,
}

impl LockedSession {
    /// Locks every partition in `table`, plus discovered successors.
    ///
    /// Partitions are locked in table order; the order is the same for
    /// every session, which is what prevents lock-order deadlock
    /// between concurrent sessions. On any acquisition failure the
    /// locks already held are released before the error returns.
    pub(crate) async fn acquire(
        table: Arc<PartitionTable>,
        cache: Arc<ConnectionCache>,
        request_timeout: Duration,
    ) -> ClientResult<Self> {
        let mut handles: HashMap<String, LockedChain> = HashMap::new();
        let mut pending: Vec<ReplicaChain> = Vec::new();

        for chain in table.chains() {
            match Self::lock_one(&cache, request_timeout, chain, &mut handles).await {
                Ok(Some(successor)) => pending.push(successor),
                Ok(None) => {}
                Err(error) => {
                    Self::release_all(&cache, &handles).await;
                    return Err(error);
                }
            }
        }

        // Successors may themselves be redirecting; walk until no new
        // partition appears. One already held is reused, never locked
        // twice.
        while let Some(chain) = pending.pop() {
            if handles.contains_key(&chain.identity()) {
                continue;
            }
            match Self::lock_one(&cache, request_timeout, &chain, &mut handles).await {
                Ok(Some(successor)) => pending.push(successor),
                Ok(None) => {}
                Err(error) => {
                    Self::release_all(&cache, &handles).await;
                    return Err(error);
                }
            }
        }

        debug!(
            path = %table.path(),
            partitions = handles.len(),
            "locked session established"
        );
        Ok(Self {
            table,
            cache,
            handles,
        })
    }

    /// Locks one chain and registers its handle. Returns the successor
    /// its acknowledgement named, if any.
    async fn lock_one(
        cache: &ConnectionCache,
        request_timeout: Duration,
        chain: &ReplicaChain,
        handles: &mut HashMap<String, LockedChain>,
    ) -> ClientResult<Option<ReplicaChain>> {
        let connection = cache.get_or_connect(chain).await?;
        let client = ChainClient::new(chain.clone(), connection, request_timeout);
        let locked = match client.lock().await {
            Ok(locked) => locked,
            Err(error) => {
                cache.invalidate(&chain.identity()).await;
                return Err(error);
            }
        };
        let successor = locked.redirect_target().cloned();
        handles.insert(locked.identity(), locked);
        Ok(successor)
    }

    async fn release_all(cache: &ConnectionCache, handles: &HashMap<String, LockedChain>) {
        for handle in handles.values() {
            if let Err(error) = handle.unlock().await {
                warn!(chain = %handle.identity(), %error, "failed to release partition lock");
                cache.invalidate(&handle.identity()).await;
            }
        }
    }

    /// Data set path the session operates on.
    #[must_use]
    pub fn path(&self) -> &str {
        self.table.path()
    }

    /// Number of partitions this session holds locked, extras included.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.handles.len()
    }

    // -------------------------------------------------------------------------
    // Locked operations
    // -------------------------------------------------------------------------

    /// Reads the value of `key`, or `None` if absent.
    ///
    /// # Errors
    /// Returns an error on transport failure or a lock protocol
    /// violation.
    pub async fn get(&self, key: impl Into<Bytes>) -> ClientResult<Option<Bytes>> {
        let head = self
            .run_locked(CommandId::Get.locked(), vec![key.into()])
            .await?;
        Ok(decode_value(head))
    }

    /// Inserts `key`. Returns false if the key already existed.
    ///
    /// # Errors
    /// Returns an error on transport failure or a lock protocol
    /// violation.
    pub async fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ClientResult<bool> {
        let head = self
            .run_locked(CommandId::Put.locked(), vec![key.into(), value.into()])
            .await?;
        decode_put(&head)
    }

    /// Replaces the value of `key`, returning the previous value.
    ///
    /// # Errors
    /// Returns an error on transport failure or a lock protocol
    /// violation.
    pub async fn update(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ClientResult<Option<Bytes>> {
        let head = self
            .run_locked(CommandId::Update.locked(), vec![key.into(), value.into()])
            .await?;
        Ok(decode_value(head))
    }

    /// Deletes `key`, returning the removed value.
    ///
    /// # Errors
    /// Returns an error on transport failure or a lock protocol
    /// violation.
    pub async fn remove(&self, key: impl Into<Bytes>) -> ClientResult<Option<Bytes>> {
        let head = self
            .run_locked(CommandId::Remove.locked(), vec![key.into()])
            .await?;
        Ok(decode_value(head))
    }

    /// Total number of keys across every locked partition, extras
    /// included. Exact while the session is open, since the locks
    /// freeze migration.
    ///
    /// The count requests are pipelined: all go out before any response
    /// is read.
    ///
    /// # Errors
    /// Returns an error on transport failure.
    pub async fn num_keys(&self) -> ClientResult<u64> {
        let mut sent: Vec<&LockedChain> = Vec::with_capacity(self.handles.len());
        for handle in self.handles.values() {
            let outcome = handle.send(CommandId::NumKeys, Vec::new()).await;
            sent.push(handle);
            if let Err(error) = outcome {
                self.drop_connections(&sent).await;
                return Err(error);
            }
        }

        let mut total = 0_u64;
        for handle in &sent {
            match handle.recv().await {
                Ok(responses) => {
                    let head = single_response(responses)?;
                    total = total.saturating_add(decode_count(&head)?);
                }
                Err(error) => {
                    self.drop_connections(&sent).await;
                    return Err(error);
                }
            }
        }
        Ok(total)
    }

    /// Drops the connections a failed pipelined fan-out touched; their
    /// outstanding responses are unaccounted for.
    async fn drop_connections(&self, handles: &[&LockedChain]) {
        for handle in handles {
            self.cache.invalidate(&handle.identity()).await;
        }
    }

    /// Releases every lock this session holds. Unlock failures are
    /// logged and swallowed (best effort).
    pub async fn close(self) {
        Self::release_all(&self.cache, &self.handles).await;
    }

    /// Routes one locked command by the snapshot and follows redirects
    /// within the locked set.
    async fn run_locked(&self, op: CommandId, args: Vec<Bytes>) -> ClientResult<Bytes> {
        let routed = self.table.route_key(&args[0]).identity();
        let mut handle = self.handle_for(&routed)?;

        // Commands route to the original partition even when it was
        // redirecting at lock time; the redirect target recorded then
        // only told acquisition what else to lock. Keys that moved
        // before the locks froze migration answer with an export signal
        // naming their new home, which this session must already hold.
        // More hops than held partitions means a cycle.
        for _ in 0..=self.handles.len() {
            let responses = match handle.run_command_redirected(op, args.clone()).await {
                Ok(responses) => responses,
                Err(error) => {
                    self.cache.invalidate(&handle.identity()).await;
                    return Err(error);
                }
            };
            let head = single_response(responses)?;
            match sentinel::decode_signal(&head)? {
                Signal::Payload => return Ok(head),
                Signal::Exporting(next) => {
                    handle = self.handle_for(&next.identity())?;
                }
                Signal::Moved => {
                    return Err(ClientError::LockProtocol {
                        message: "partition disowned a slot while locked".to_string(),
                    });
                }
            }
        }
        Err(ClientError::LockProtocol {
            message: "redirect cycle among locked partitions".to_string(),
        })
    }

    fn handle_for(&self, identity: &str) -> ClientResult<&LockedChain> {
        self.handles
            .get(identity)
            .ok_or_else(|| ClientError::LockProtocol {
                message: format!("partition {identity} is not locked by this session"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_rpc::{CreateOptions, DirectoryService, SimulatedCluster};

    async fn session_parts(
        num_blocks: u32,
    ) -> (SimulatedCluster, Arc<PartitionTable>, Arc<ConnectionCache>) {
        let cluster = SimulatedCluster::new();
        let status = cluster
            .create("/data", &CreateOptions::default().with_num_blocks(num_blocks))
            .await
            .unwrap();
        let table = Arc::new(PartitionTable::from_status("/data", &status).unwrap());
        let cache = Arc::new(ConnectionCache::new(
            Arc::new(cluster.clone()),
            Duration::from_secs(1),
        ));
        (cluster, table, cache)
    }

    #[tokio::test]
    async fn test_session_locks_and_releases_every_partition() {
        let (cluster, table, cache) = session_parts(3).await;
        let ids = cluster.partition_ids("/data");

        let session = LockedSession::acquire(table, cache, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(session.partition_count(), 3);
        for id in &ids {
            assert!(cluster.is_locked(id));
        }

        session.close().await;
        for id in &ids {
            assert!(!cluster.is_locked(id));
        }
    }

    #[tokio::test]
    async fn test_locked_operations_round_trip() {
        let (_cluster, table, cache) = session_parts(2).await;
        let session = LockedSession::acquire(table, cache, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(session.put("k", "v1").await.unwrap());
        assert!(!session.put("k", "v2").await.unwrap());
        assert_eq!(session.get("k").await.unwrap(), Some(Bytes::from_static(b"v1")));
        assert_eq!(
            session.update("k", "v3").await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
        assert_eq!(session.num_keys().await.unwrap(), 1);
        assert_eq!(
            session.remove("k").await.unwrap(),
            Some(Bytes::from_static(b"v3"))
        );
        assert_eq!(session.get("k").await.unwrap(), None);

        session.close().await;
    }
}
