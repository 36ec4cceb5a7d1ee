//! Per-data-set KV operations.
//!
//! Every operation routes by key slot against the current table
//! snapshot, follows `"!exporting"` redirects transparently, and treats
//! `"!block_moved"` as a stale table: refresh from the directory and
//! restart the whole operation, up to
//! [`ClientConfig::table_refresh_limit`] times. Batches are grouped by
//! destination partition and pipelined (send everything, then receive
//! everything); a stale-table signal from any element discards the whole
//! batch before the restart, so callers never see partial results.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use strand_core::ReplicaChain;
use strand_rpc::sentinel::{self, Signal};
use strand_rpc::{slot_hash, CommandId, DirectoryService};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::cache::ConnectionCache;
use crate::chain::ChainClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::locked::LockedSession;
use crate::table::PartitionTable;

/// Client for one data set.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct KvClient {
    /// Data set path.
    path: String,
    /// Directory service, used only for table refreshes.
    directory: Arc<dyn DirectoryService>,
    /// Partition connections, shared with locked sessions.
    cache: Arc<ConnectionCache>,
    /// Current table snapshot, replaced wholesale on refresh.
    table: RwLock<Arc<PartitionTable>>,
    config: ClientConfig,
}

impl KvClient {
    pub(crate) fn new(
        path: String,
        directory: Arc<dyn DirectoryService>,
        cache: Arc<ConnectionCache>,
        table: PartitionTable,
        config: ClientConfig,
    ) -> Self {
        Self {
            path,
            directory,
            cache,
            table: RwLock::new(Arc::new(table)),
            config,
        }
    }

    /// Data set path this client operates on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current table snapshot.
    pub async fn table(&self) -> Arc<PartitionTable> {
        Arc::clone(&*self.table.read().await)
    }

    /// Replaces the table with a fresh one from the directory service.
    ///
    /// # Errors
    /// Returns an error if the directory call fails or reports an
    /// unroutable table.
    pub async fn refresh_table(&self) -> ClientResult<()> {
        let status = self.directory.dstatus(&self.path).await?;
        let table = PartitionTable::from_status(self.path.clone(), &status)?;
        debug!(path = %self.path, partitions = table.len(), "refreshed partition table");
        *self.table.write().await = Arc::new(table);
        Ok(())
    }

    /// Opens a locked session over the current table snapshot.
    ///
    /// # Errors
    /// Returns an error if any partition lock cannot be acquired; locks
    /// obtained before the failure are released first.
    pub async fn lock(&self) -> ClientResult<LockedSession> {
        let table = self.table().await;
        LockedSession::acquire(table, Arc::clone(&self.cache), self.config.request_timeout).await
    }

    // -------------------------------------------------------------------------
    // Single-key operations
    // -------------------------------------------------------------------------

    /// Whether `key` is present.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn exists(&self, key: impl Into<Bytes>) -> ClientResult<bool> {
        let head = self.run_keyed(CommandId::Exists, vec![key.into()]).await?;
        decode_bool(&head)
    }

    /// Reads the value of `key`, or `None` if absent.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn get(&self, key: impl Into<Bytes>) -> ClientResult<Option<Bytes>> {
        let head = self.run_keyed(CommandId::Get, vec![key.into()]).await?;
        Ok(decode_value(head))
    }

    /// Inserts `key`. Returns false if the key already existed (the
    /// stored value is left untouched).
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ClientResult<bool> {
        let head = self
            .run_keyed(CommandId::Put, vec![key.into(), value.into()])
            .await?;
        decode_put(&head)
    }

    /// Replaces the value of `key`, returning the previous value, or
    /// `None` if the key was absent (nothing is inserted).
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn update(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ClientResult<Option<Bytes>> {
        let head = self
            .run_keyed(CommandId::Update, vec![key.into(), value.into()])
            .await?;
        Ok(decode_value(head))
    }

    /// Deletes `key`, returning the removed value, or `None` if absent.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn remove(&self, key: impl Into<Bytes>) -> ClientResult<Option<Bytes>> {
        let head = self.run_keyed(CommandId::Remove, vec![key.into()]).await?;
        Ok(decode_value(head))
    }

    /// Total number of keys across all partitions.
    ///
    /// Mid-migration the count is approximate: a moving key is counted
    /// wherever it currently lives.
    ///
    /// # Errors
    /// Returns an error on transport failure.
    pub async fn num_keys(&self) -> ClientResult<u64> {
        let table = self.table().await;
        let mut total = 0_u64;
        for chain in table.chains() {
            let responses = self.exchange(chain, CommandId::NumKeys, Vec::new(), false).await?;
            let head = single_response(responses)?;
            total = total.saturating_add(decode_count(&head)?);
        }
        Ok(total)
    }

    // -------------------------------------------------------------------------
    // Batched operations
    // -------------------------------------------------------------------------

    /// Membership tests for many keys, in input order.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn exists_many(&self, keys: Vec<Bytes>) -> ClientResult<Vec<bool>> {
        let heads = self.run_batch(CommandId::Exists, keys).await?;
        heads.iter().map(decode_bool).collect()
    }

    /// Reads many keys, in input order.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn get_many(&self, keys: Vec<Bytes>) -> ClientResult<Vec<Option<Bytes>>> {
        let heads = self.run_batch(CommandId::Get, keys).await?;
        Ok(heads.into_iter().map(decode_value).collect())
    }

    /// Inserts many pairs, in input order. Each element reports whether
    /// its key was newly inserted.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn put_many(&self, pairs: Vec<(Bytes, Bytes)>) -> ClientResult<Vec<bool>> {
        let heads = self.run_batch(CommandId::Put, flatten_pairs(pairs)).await?;
        heads.iter().map(decode_put).collect()
    }

    /// Replaces many values, in input order, returning each previous
    /// value.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn update_many(
        &self,
        pairs: Vec<(Bytes, Bytes)>,
    ) -> ClientResult<Vec<Option<Bytes>>> {
        let heads = self.run_batch(CommandId::Update, flatten_pairs(pairs)).await?;
        Ok(heads.into_iter().map(decode_value).collect())
    }

    /// Deletes many keys, in input order, returning each removed value.
    ///
    /// # Errors
    /// Returns an error on transport failure or a persistently stale
    /// table.
    pub async fn remove_many(&self, keys: Vec<Bytes>) -> ClientResult<Vec<Option<Bytes>>> {
        let heads = self.run_batch(CommandId::Remove, keys).await?;
        Ok(heads.into_iter().map(decode_value).collect())
    }

    // -------------------------------------------------------------------------
    // Protocol drivers
    // -------------------------------------------------------------------------

    async fn chain_client(&self, chain: &ReplicaChain) -> ClientResult<ChainClient> {
        let connection = self.cache.get_or_connect(chain).await?;
        Ok(ChainClient::new(
            chain.clone(),
            connection,
            self.config.request_timeout,
        ))
    }

    /// One command exchange against one chain. A failed exchange leaves
    /// the connection's stream state unknown, so it is dropped from the
    /// cache before the error propagates.
    async fn exchange(
        &self,
        chain: &ReplicaChain,
        op: CommandId,
        args: Vec<Bytes>,
        redirected: bool,
    ) -> ClientResult<Vec<Bytes>> {
        let client = self.chain_client(chain).await?;
        let result = if redirected {
            client.run_command_redirected(op, args).await
        } else {
            client.run_command(op, args).await
        };
        if result.is_err() {
            self.cache.invalidate(&client.identity()).await;
        }
        result
    }

    /// Runs one keyed operation to completion through redirects and
    /// table refreshes.
    async fn run_keyed(&self, op: CommandId, args: Vec<Bytes>) -> ClientResult<Bytes> {
        for _ in 0..self.config.table_refresh_limit {
            let table = self.table().await;
            let chain = table.route_key(&args[0]).clone();
            let responses = self.exchange(&chain, op, args.clone(), false).await?;
            let head = single_response(responses)?;
            match sentinel::decode_signal(&head)? {
                Signal::Payload => return Ok(head),
                Signal::Exporting(target) => {
                    if let Some(payload) = self.chase_redirect(op, &args, target).await? {
                        return Ok(payload);
                    }
                }
                Signal::Moved => {}
            }
            trace!(path = %self.path, ?op, "table stale, refreshing and retrying");
            self.refresh_table().await?;
        }
        Err(ClientError::StaleTable {
            refreshes: self.config.table_refresh_limit,
        })
    }

    /// Follows exporting redirects until a payload arrives. Returns
    /// `None` when a hop reports the table stale instead.
    ///
    /// The hop count is bounded by migration convergence, not by the
    /// client: each hop names a strictly newer home for the key.
    async fn chase_redirect(
        &self,
        op: CommandId,
        args: &[Bytes],
        mut target: ReplicaChain,
    ) -> ClientResult<Option<Bytes>> {
        loop {
            trace!(target = %target.identity(), ?op, "following export redirect");
            let responses = self.exchange(&target, op, args.to_vec(), true).await?;
            let head = single_response(responses)?;
            match sentinel::decode_signal(&head)? {
                Signal::Payload => return Ok(Some(head)),
                Signal::Exporting(next) => target = next,
                Signal::Moved => return Ok(None),
            }
        }
    }

    /// Runs one batched operation to completion, restarting the whole
    /// batch on stale-table signals.
    async fn run_batch(&self, op: CommandId, args: Vec<Bytes>) -> ClientResult<Vec<Bytes>> {
        let arity = op.arity();
        if arity == 0 {
            return Err(ClientError::InvalidArgument {
                message: format!("opcode {op:?} cannot be batched"),
            });
        }
        if args.is_empty() {
            return Ok(Vec::new());
        }
        if args.len() % arity != 0 {
            return Err(ClientError::InvalidArgument {
                message: format!(
                    "argument count {} is not a multiple of arity {arity}",
                    args.len()
                ),
            });
        }
        let operations = args.len() / arity;

        for _ in 0..self.config.table_refresh_limit {
            if let Some(responses) = self.dispatch_batch(op, &args, arity, operations).await? {
                return Ok(responses);
            }
            trace!(path = %self.path, ?op, "table stale mid-batch, refreshing and restarting");
            self.refresh_table().await?;
        }
        Err(ClientError::StaleTable {
            refreshes: self.config.table_refresh_limit,
        })
    }

    /// One dispatch attempt over the current table. `None` means a
    /// stale-table signal aborted the batch; the caller refreshes and
    /// restarts.
    async fn dispatch_batch(
        &self,
        op: CommandId,
        args: &[Bytes],
        arity: usize,
        operations: usize,
    ) -> ClientResult<Option<Vec<Bytes>>> {
        let table = self.table().await;

        // Group logical operations by destination partition, preserving
        // relative order and remembering original positions.
        let mut groups: HashMap<usize, BatchGroup> = HashMap::new();
        for (position, chunk) in args.chunks(arity).enumerate() {
            let partition = table.partition_for(slot_hash(&chunk[0]));
            let group = groups.entry(partition).or_default();
            group.args.extend_from_slice(chunk);
            group.positions.push(position);
        }
        let mut ordered: Vec<(usize, BatchGroup)> = groups.into_iter().collect();
        ordered.sort_unstable_by_key(|(partition, _)| *partition);

        // Send every group before receiving any response, so batch
        // latency tracks the slowest partition rather than the sum.
        let mut dispatches: Vec<(ChainClient, Vec<usize>)> = Vec::with_capacity(ordered.len());
        for (partition, group) in ordered {
            let client = match self.chain_client(&table.chains()[partition]).await {
                Ok(client) => client,
                Err(error) => {
                    self.drop_batch_connections(&dispatches).await;
                    return Err(error);
                }
            };
            let sent = client.send(op, group.args).await;
            dispatches.push((client, group.positions));
            if let Err(error) = sent {
                self.drop_batch_connections(&dispatches).await;
                return Err(error);
            }
        }

        // Receive in send order; responses scatter back to original
        // positions.
        let mut collected: Vec<Option<Bytes>> = vec![None; operations];
        for (client, positions) in &dispatches {
            let responses = match client.recv().await {
                Ok(responses) => responses,
                Err(error) => {
                    self.drop_batch_connections(&dispatches).await;
                    return Err(error);
                }
            };
            if responses.len() != positions.len() {
                self.drop_batch_connections(&dispatches).await;
                return Err(ClientError::MalformedPayload {
                    message: format!(
                        "expected {} batched responses, got {}",
                        positions.len(),
                        responses.len()
                    ),
                });
            }
            for (response, &position) in responses.into_iter().zip(positions) {
                collected[position] = Some(response);
            }
        }

        // Resolve each element independently; any stale-table signal
        // discards the whole batch (fail-together).
        let mut resolved = Vec::with_capacity(operations);
        for (position, head) in collected.into_iter().enumerate() {
            let head = head.ok_or_else(|| ClientError::MalformedPayload {
                message: "batched operation received no response".to_string(),
            })?;
            match sentinel::decode_signal(&head)? {
                Signal::Payload => resolved.push(head),
                Signal::Exporting(target) => {
                    let chunk = &args[position * arity..(position + 1) * arity];
                    match self.chase_redirect(op, chunk, target).await? {
                        Some(payload) => resolved.push(payload),
                        None => return Ok(None),
                    }
                }
                Signal::Moved => return Ok(None),
            }
        }
        Ok(Some(resolved))
    }

    /// Drops every connection a failed batch touched; their outstanding
    /// pipelined responses are unaccounted for.
    async fn drop_batch_connections(&self, dispatches: &[(ChainClient, Vec<usize>)]) {
        for (client, _) in dispatches {
            self.cache.invalidate(&client.identity()).await;
        }
    }
}

/// Arguments of one partition-bound sub-batch.
#[derive(Debug, Default)]
struct BatchGroup {
    /// Flat arguments, chunked by arity.
    args: Vec<Bytes>,
    /// Original position of each logical operation.
    positions: Vec<usize>,
}

fn flatten_pairs(pairs: Vec<(Bytes, Bytes)>) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(pairs.len() * 2);
    for (key, value) in pairs {
        args.push(key);
        args.push(value);
    }
    args
}

pub(crate) fn single_response(responses: Vec<Bytes>) -> ClientResult<Bytes> {
    responses
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::MalformedPayload {
            message: "empty response batch".to_string(),
        })
}

// -----------------------------------------------------------------------------
// Payload decoding
// -----------------------------------------------------------------------------

/// `"!key_not_found"` means absent; anything else is the value.
pub(crate) fn decode_value(head: Bytes) -> Option<Bytes> {
    if head.as_ref() == sentinel::KEY_NOT_FOUND.as_bytes() {
        None
    } else {
        Some(head)
    }
}

pub(crate) fn decode_bool(head: &Bytes) -> ClientResult<bool> {
    match head.as_ref() {
        b"true" => Ok(true),
        b"false" => Ok(false),
        other => Err(ClientError::MalformedPayload {
            message: format!("expected boolean, got {:?}", String::from_utf8_lossy(other)),
        }),
    }
}

/// `"!ok"` means inserted; `"!duplicate_key"` means the key existed.
pub(crate) fn decode_put(head: &Bytes) -> ClientResult<bool> {
    if head.as_ref() == sentinel::OK.as_bytes() {
        Ok(true)
    } else if head.as_ref() == sentinel::DUPLICATE_KEY.as_bytes() {
        Ok(false)
    } else {
        Err(ClientError::MalformedPayload {
            message: format!(
                "expected put status, got {:?}",
                String::from_utf8_lossy(head)
            ),
        })
    }
}

pub(crate) fn decode_count(head: &Bytes) -> ClientResult<u64> {
    let text = std::str::from_utf8(head).map_err(|_| ClientError::MalformedPayload {
        message: "count is not UTF-8".to_string(),
    })?;
    text.parse::<u64>().map_err(|_| ClientError::MalformedPayload {
        message: format!("expected decimal count, got {text:?}"),
    })
}
