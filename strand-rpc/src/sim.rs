//! Deterministic in-memory cluster for protocol testing.
//!
//! [`SimulatedCluster`] implements every service seam in this crate
//! ([`DirectoryService`], [`LeaseService`], [`ChainConnector`]) against
//! plain in-memory state, so client code can be driven through redirects,
//! stale tables, partition locks, and lease renewal without any network.
//!
//! Migration scenarios are scripted with the same verbs the storage
//! management plane uses: mark a partition exporting, set up an importing
//! peer, move the covered keys, then settle both sides and publish the
//! new table. The directory's table is deliberately independent from
//! partition state, which is exactly what lets tests hold it stale.
//!
//! Clones share the underlying cluster state, so a test can keep one
//! handle for scripting while the client under test owns another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use strand_core::{DataStatus, ReplicaChain, SlotRange, StorageMode, SLOT_MAX};

use crate::command::CommandId;
use crate::connection::{ChainConnection, ChainConnector};
use crate::directory::{CreateOptions, DirectoryService};
use crate::error::{RpcError, RpcResult};
use crate::hash::slot_hash;
use crate::lease::{LeaseAck, LeaseService};
use crate::sentinel;

/// Lease period handed out when none is configured.
const DEFAULT_LEASE_PERIOD_MS: u64 = 10_000;

// -----------------------------------------------------------------------------
// Cluster state
// -----------------------------------------------------------------------------

/// Migration phase of a simulated partition.
#[derive(Debug, Clone)]
enum Phase {
    /// Serving its owned slots in place.
    Regular,
    /// Handing the covered slots to the target chain; keys already moved
    /// answer with an exporting signal.
    Exporting {
        /// Slots being handed off.
        slots: SlotRange,
        /// Where they are going.
        target: ReplicaChain,
    },
    /// Receiving the covered slots; admits them only on commands carrying
    /// the redirected marker.
    Importing {
        /// Slots being received.
        slots: SlotRange,
    },
}

/// One simulated partition. A whole replica chain collapses to a single
/// piece of state; chain replication itself is out of scope here.
#[derive(Debug)]
struct Partition {
    /// Descriptor reported through the directory.
    chain: ReplicaChain,
    /// Slots admitted without a redirected marker. `None` for freshly
    /// set-up importers that are not serving yet.
    owned: Option<SlotRange>,
    store: HashMap<Bytes, Bytes>,
    locked: bool,
    /// Cumulative lock acquisitions, for double-lock assertions.
    lock_count: u64,
    phase: Phase,
}

/// Directory metadata for one path.
#[derive(Debug)]
struct DataSet {
    /// Partition identities in ascending slot order. This is what
    /// `dstatus` reports; partition state may have moved on.
    table: Vec<String>,
    backing_path: String,
    chain_length: u32,
    flags: u32,
    tags: HashMap<String, String>,
}

#[derive(Debug)]
struct SimState {
    partitions: HashMap<String, Partition>,
    paths: HashMap<String, DataSet>,
    next_block: u64,
    dstatus_calls: u64,
    lease_period_ms: u64,
    /// Non-empty renewal rounds, oldest first. Empty probes are not
    /// recorded.
    renewal_log: Vec<Vec<String>>,
    fail_next_renewal: bool,
    fail_all_renewals: bool,
    /// Identities whose next command fails (one-shot).
    fail_next_command: HashSet<String>,
    /// Forwarded maintenance calls: (verb, path, backing path).
    fs_calls: Vec<(&'static str, String, String)>,
}

impl SimState {
    fn new(lease_period_ms: u64) -> Self {
        Self {
            partitions: HashMap::new(),
            paths: HashMap::new(),
            next_block: 0,
            dstatus_calls: 0,
            lease_period_ms,
            renewal_log: Vec::new(),
            fail_next_renewal: false,
            fail_all_renewals: false,
            fail_next_command: HashSet::new(),
            fs_calls: Vec::new(),
        }
    }

    /// Allocates a partition and registers it under its identity.
    fn allocate_partition(
        &mut self,
        slots: SlotRange,
        chain_length: u32,
        owned: Option<SlotRange>,
        phase: Phase,
    ) -> String {
        let id = self.next_block;
        self.next_block += 1;
        let blocks: Vec<String> = (0..chain_length)
            .map(|replica| format!("block-{id}-{replica}"))
            .collect();
        let chain = ReplicaChain::new(blocks, slots, StorageMode::InMemory);
        let identity = chain.identity();
        self.partitions.insert(
            identity.clone(),
            Partition {
                chain,
                owned,
                store: HashMap::new(),
                locked: false,
                lock_count: 0,
                phase,
            },
        );
        identity
    }

    /// Builds the `DataStatus` the directory reports for `path`.
    fn status_of(&self, path: &str) -> RpcResult<DataStatus> {
        let set = self.paths.get(path).ok_or_else(|| RpcError::PathNotFound {
            path: path.to_string(),
        })?;
        let chains = set
            .table
            .iter()
            .map(|identity| {
                self.partitions
                    .get(identity)
                    .expect("table references an unknown partition")
                    .chain
                    .clone()
            })
            .collect();
        let mut status = DataStatus::new(set.backing_path.clone(), set.chain_length, chains);
        status.flags = set.flags;
        status.tags = set.tags.clone();
        Ok(status)
    }
}

// -----------------------------------------------------------------------------
// SimulatedCluster
// -----------------------------------------------------------------------------

/// An in-memory cluster implementing the directory, lease, and
/// connection seams.
#[derive(Debug, Clone)]
pub struct SimulatedCluster {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCluster {
    /// Creates a cluster with the default lease period.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lease_period(DEFAULT_LEASE_PERIOD_MS)
    }

    /// Creates a cluster advertising the given lease period.
    #[must_use]
    pub fn with_lease_period(lease_period_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(lease_period_ms))),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock poisoned")
    }

    // -------------------------------------------------------------------------
    // Scenario verbs
    // -------------------------------------------------------------------------

    /// Partition identities of `path`, in table order.
    ///
    /// # Panics
    ///
    /// Panics if the path does not exist.
    #[must_use]
    pub fn partition_ids(&self, path: &str) -> Vec<String> {
        let state = self.state();
        state
            .paths
            .get(path)
            .expect("unknown path")
            .table
            .clone()
    }

    /// Sets up a fresh partition importing the given slots, outside any
    /// table. Returns its identity.
    ///
    /// # Panics
    ///
    /// Panics if the path does not exist.
    pub fn setup_importing(&self, path: &str, slots: SlotRange) -> String {
        let mut state = self.state();
        let chain_length = state.paths.get(path).expect("unknown path").chain_length;
        state.allocate_partition(slots, chain_length, None, Phase::Importing { slots })
    }

    /// Marks a partition as exporting the given slots to `target`.
    ///
    /// # Panics
    ///
    /// Panics if either partition does not exist.
    pub fn set_exporting(&self, identity: &str, slots: SlotRange, target: &str) {
        let mut state = self.state();
        let target_chain = state
            .partitions
            .get(target)
            .expect("unknown export target")
            .chain
            .clone();
        let partition = state.partitions.get_mut(identity).expect("unknown partition");
        partition.phase = Phase::Exporting {
            slots,
            target: target_chain,
        };
    }

    /// Moves every key covered by a partition's export range to its
    /// target.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist or is not exporting.
    pub fn export_slots(&self, identity: &str) {
        let mut state = self.state();
        let partition = state.partitions.get_mut(identity).expect("unknown partition");
        let Phase::Exporting { slots, ref target } = partition.phase else {
            panic!("export_slots on a partition that is not exporting");
        };
        let target_id = target.identity();
        let moved: Vec<Bytes> = partition
            .store
            .keys()
            .filter(|key| slots.contains(slot_hash(key)))
            .cloned()
            .collect();
        let mut entries = Vec::with_capacity(moved.len());
        for key in moved {
            let value = partition.store.remove(&key).expect("key vanished during export");
            entries.push((key, value));
        }
        let importer = state
            .partitions
            .get_mut(&target_id)
            .expect("unknown export target");
        importer.store.extend(entries);
    }

    /// Settles a partition: it owns `slots`, serving them in place.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist.
    pub fn set_regular(&self, identity: &str, slots: SlotRange) {
        let mut state = self.state();
        let partition = state.partitions.get_mut(identity).expect("unknown partition");
        partition.owned = Some(slots);
        partition.chain.slots = slots;
        partition.phase = Phase::Regular;
    }

    /// Publishes a new table for `path`.
    ///
    /// # Panics
    ///
    /// Panics if the path or any identity is unknown, if a listed
    /// partition is not settled, or if the begins are not strictly
    /// ascending from slot 0.
    pub fn update_table(&self, path: &str, identities: &[String]) {
        let mut state = self.state();
        let mut begins = Vec::with_capacity(identities.len());
        for identity in identities {
            let partition = state.partitions.get(identity).expect("unknown partition in table");
            let owned = partition.owned.expect("table partition must own a slot range");
            begins.push(owned.begin);
        }
        assert_eq!(begins.first(), Some(&0), "table must start at slot 0");
        assert!(
            begins.windows(2).all(|pair| pair[0] < pair[1]),
            "table begins must be strictly ascending"
        );
        let set = state.paths.get_mut(path).expect("unknown path");
        set.table = identities.to_vec();
    }

    // -------------------------------------------------------------------------
    // Fault injection and introspection
    // -------------------------------------------------------------------------

    /// Fails the next command sent to the given partition (one-shot).
    pub fn fail_next_command(&self, identity: &str) {
        self.state().fail_next_command.insert(identity.to_string());
    }

    /// Fails the next renewal round (one-shot).
    pub fn fail_next_renewal(&self) {
        self.state().fail_next_renewal = true;
    }

    /// Fails every renewal round until cleared.
    pub fn set_fail_renewals(&self, fail: bool) {
        self.state().fail_all_renewals = fail;
    }

    /// Changes the advertised lease period.
    pub fn set_lease_period(&self, lease_period_ms: u64) {
        self.state().lease_period_ms = lease_period_ms;
    }

    /// Number of `dstatus` calls served so far.
    #[must_use]
    pub fn dstatus_calls(&self) -> u64 {
        self.state().dstatus_calls
    }

    /// Non-empty renewal rounds received, oldest first.
    #[must_use]
    pub fn renewal_log(&self) -> Vec<Vec<String>> {
        self.state().renewal_log.clone()
    }

    /// Cumulative lock acquisitions on a partition.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist.
    #[must_use]
    pub fn lock_count(&self, identity: &str) -> u64 {
        self.state()
            .partitions
            .get(identity)
            .expect("unknown partition")
            .lock_count
    }

    /// Whether a partition is currently locked.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist.
    #[must_use]
    pub fn is_locked(&self, identity: &str) -> bool {
        self.state()
            .partitions
            .get(identity)
            .expect("unknown partition")
            .locked
    }

    /// Number of keys a partition holds.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist.
    #[must_use]
    pub fn partition_len(&self, identity: &str) -> usize {
        self.state()
            .partitions
            .get(identity)
            .expect("unknown partition")
            .store
            .len()
    }

    /// Forwarded maintenance calls: (verb, path, backing path).
    #[must_use]
    pub fn fs_calls(&self) -> Vec<(&'static str, String, String)> {
        self.state().fs_calls.clone()
    }

    // -------------------------------------------------------------------------
    // Command execution
    // -------------------------------------------------------------------------

    /// Executes one command against a partition, producing one response
    /// per logical operation.
    fn execute(&self, identity: &str, op: CommandId, args: &[Bytes]) -> RpcResult<Vec<Bytes>> {
        let mut state = self.state();
        if state.fail_next_command.remove(identity) {
            return Err(RpcError::ConnectionClosed {
                chain: identity.to_string(),
                message: "injected connection failure".to_string(),
            });
        }
        let partition = state
            .partitions
            .get_mut(identity)
            .ok_or_else(|| RpcError::ConnectionClosed {
                chain: identity.to_string(),
                message: "partition no longer exists".to_string(),
            })?;

        let (args, redirected) = split_redirected_marker(args);
        match op {
            CommandId::Lock => {
                partition.locked = true;
                partition.lock_count += 1;
                let ack = match &partition.phase {
                    Phase::Exporting { target, .. } => sentinel::encode_redirecting(target),
                    _ => Bytes::from_static(sentinel::OK.as_bytes()),
                };
                Ok(vec![ack])
            }
            CommandId::Unlock => {
                partition.locked = false;
                Ok(vec![Bytes::from_static(sentinel::OK.as_bytes())])
            }
            CommandId::NumKeys => Ok(vec![Bytes::from(partition.store.len().to_string())]),
            _ => {
                let arity = op.arity();
                assert!(arity > 0, "keyed opcode must have a positive arity");
                assert!(
                    args.len() % arity == 0,
                    "argument count must be a multiple of the opcode arity"
                );
                let mut responses = Vec::with_capacity(args.len() / arity);
                for chunk in args.chunks(arity) {
                    responses.push(apply(partition, op.base(), chunk, redirected));
                }
                Ok(responses)
            }
        }
    }
}

/// Applies one keyed operation to a partition.
fn apply(partition: &mut Partition, base: CommandId, chunk: &[Bytes], redirected: bool) -> Bytes {
    let key = &chunk[0];
    let slot = slot_hash(key);

    // Ownership gate: a slot outside what this partition serves means the
    // caller routed with a stale table, unless the command was redirected
    // here for a slot being imported.
    let owned = partition.owned.is_some_and(|slots| slots.contains(slot));
    let importing = matches!(partition.phase, Phase::Importing { slots } if slots.contains(slot));
    if !owned && !(redirected && importing) {
        return Bytes::from_static(sentinel::BLOCK_MOVED.as_bytes());
    }

    // Export gate: data covered by an in-flight export that is no longer
    // here has moved to the target; send the caller after it.
    if let Phase::Exporting { slots, ref target } = partition.phase {
        if slots.contains(slot) && !partition.store.contains_key(key) {
            return sentinel::encode_exporting(target);
        }
    }

    match base {
        CommandId::Exists => {
            if partition.store.contains_key(key) {
                Bytes::from_static(b"true")
            } else {
                Bytes::from_static(b"false")
            }
        }
        CommandId::Get => partition
            .store
            .get(key)
            .cloned()
            .unwrap_or_else(|| Bytes::from_static(sentinel::KEY_NOT_FOUND.as_bytes())),
        CommandId::Put => {
            if partition.store.contains_key(key) {
                Bytes::from_static(sentinel::DUPLICATE_KEY.as_bytes())
            } else {
                partition.store.insert(key.clone(), chunk[1].clone());
                Bytes::from_static(sentinel::OK.as_bytes())
            }
        }
        CommandId::Update => match partition.store.get_mut(key) {
            Some(value) => std::mem::replace(value, chunk[1].clone()),
            None => Bytes::from_static(sentinel::KEY_NOT_FOUND.as_bytes()),
        },
        CommandId::Remove => partition
            .store
            .remove(key)
            .unwrap_or_else(|| Bytes::from_static(sentinel::KEY_NOT_FOUND.as_bytes())),
        _ => unreachable!("apply only handles keyed opcodes"),
    }
}

/// Strips the trailing redirected marker, if present.
fn split_redirected_marker(args: &[Bytes]) -> (&[Bytes], bool) {
    match args.split_last() {
        Some((last, rest)) if last.as_ref() == sentinel::REDIRECTED.as_bytes() => (rest, true),
        _ => (args, false),
    }
}

// -----------------------------------------------------------------------------
// Service implementations
// -----------------------------------------------------------------------------

#[async_trait]
impl DirectoryService for SimulatedCluster {
    async fn create(&self, path: &str, options: &CreateOptions) -> RpcResult<DataStatus> {
        let mut state = self.state();
        if state.paths.contains_key(path) {
            return Err(RpcError::Directory {
                path: path.to_string(),
                message: "path already exists".to_string(),
            });
        }
        let num_blocks = options.num_blocks;
        let slot_size = SLOT_MAX / num_blocks;
        let mut table = Vec::with_capacity(num_blocks as usize);
        for i in 0..num_blocks {
            let begin = i.saturating_mul(slot_size);
            let end = if i == num_blocks - 1 {
                SLOT_MAX
            } else {
                (i + 1).saturating_mul(slot_size)
            };
            let slots = SlotRange::new(begin, end);
            let identity =
                state.allocate_partition(slots, options.chain_length, Some(slots), Phase::Regular);
            table.push(identity);
        }
        state.paths.insert(
            path.to_string(),
            DataSet {
                table,
                backing_path: options.backing_path.clone(),
                chain_length: options.chain_length,
                flags: options.flags,
                tags: options.tags.clone(),
            },
        );
        state.status_of(path)
    }

    async fn open(&self, path: &str) -> RpcResult<DataStatus> {
        self.state().status_of(path)
    }

    async fn open_or_create(&self, path: &str, options: &CreateOptions) -> RpcResult<DataStatus> {
        let exists = self.state().paths.contains_key(path);
        if exists {
            self.open(path).await
        } else {
            self.create(path, options).await
        }
    }

    async fn dstatus(&self, path: &str) -> RpcResult<DataStatus> {
        let mut state = self.state();
        state.dstatus_calls += 1;
        state.status_of(path)
    }

    async fn remove(&self, path: &str) -> RpcResult<()> {
        let mut state = self.state();
        let set = state.paths.remove(path).ok_or_else(|| RpcError::PathNotFound {
            path: path.to_string(),
        })?;
        for identity in &set.table {
            state.partitions.remove(identity);
        }
        Ok(())
    }

    async fn remove_all(&self, path: &str) -> RpcResult<()> {
        let mut state = self.state();
        let doomed: Vec<String> = state
            .paths
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(set) = state.paths.remove(&p) {
                for identity in &set.table {
                    state.partitions.remove(identity);
                }
            }
        }
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> RpcResult<()> {
        let mut state = self.state();
        if state.paths.contains_key(new_path) {
            return Err(RpcError::Directory {
                path: new_path.to_string(),
                message: "destination already exists".to_string(),
            });
        }
        let set = state.paths.remove(old_path).ok_or_else(|| RpcError::PathNotFound {
            path: old_path.to_string(),
        })?;
        state.paths.insert(new_path.to_string(), set);
        Ok(())
    }

    async fn sync(&self, path: &str, backing_path: &str) -> RpcResult<()> {
        self.record_fs_call("sync", path, backing_path)
    }

    async fn dump(&self, path: &str, backing_path: &str) -> RpcResult<()> {
        self.record_fs_call("dump", path, backing_path)
    }

    async fn load(&self, path: &str, backing_path: &str) -> RpcResult<()> {
        self.record_fs_call("load", path, backing_path)
    }
}

impl SimulatedCluster {
    fn record_fs_call(&self, verb: &'static str, path: &str, backing_path: &str) -> RpcResult<()> {
        let mut state = self.state();
        if !state.paths.contains_key(path) {
            return Err(RpcError::PathNotFound {
                path: path.to_string(),
            });
        }
        state
            .fs_calls
            .push((verb, path.to_string(), backing_path.to_string()));
        Ok(())
    }
}

#[async_trait]
impl LeaseService for SimulatedCluster {
    async fn renew_leases(&self, paths: &[String]) -> RpcResult<LeaseAck> {
        let mut state = self.state();
        if state.fail_next_renewal {
            state.fail_next_renewal = false;
            return Err(RpcError::Lease {
                message: "injected renewal failure (one-shot)".to_string(),
            });
        }
        if state.fail_all_renewals {
            return Err(RpcError::Lease {
                message: "injected renewal failure".to_string(),
            });
        }
        let renewed = paths.iter().filter(|p| state.paths.contains_key(*p)).count();
        if !paths.is_empty() {
            state.renewal_log.push(paths.to_vec());
        }
        Ok(LeaseAck {
            renewed: u64::try_from(renewed).unwrap_or(u64::MAX),
            lease_period_ms: state.lease_period_ms,
        })
    }
}

#[async_trait]
impl ChainConnector for SimulatedCluster {
    async fn connect(&self, chain: &ReplicaChain) -> RpcResult<Arc<dyn ChainConnection>> {
        let identity = chain.identity();
        if !self.state().partitions.contains_key(&identity) {
            return Err(RpcError::ConnectFailed {
                chain: identity,
                message: "unknown chain".to_string(),
            });
        }
        Ok(Arc::new(SimulatedConnection {
            cluster: self.clone(),
            identity,
            pending: Mutex::new(VecDeque::new()),
        }))
    }
}

/// One in-memory connection. Responses are computed at send time and
/// queued, which preserves the request-order delivery the trait promises.
#[derive(Debug)]
struct SimulatedConnection {
    cluster: SimulatedCluster,
    identity: String,
    pending: Mutex<VecDeque<Vec<Bytes>>>,
}

#[async_trait]
impl ChainConnection for SimulatedConnection {
    async fn send_request(&self, op: CommandId, args: Vec<Bytes>) -> RpcResult<()> {
        let responses = self.cluster.execute(&self.identity, op, &args)?;
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .push_back(responses);
        Ok(())
    }

    async fn recv_response(&self) -> RpcResult<Vec<Bytes>> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .pop_front()
            .ok_or_else(|| RpcError::MalformedResponse {
                message: "recv_response with no outstanding request".to_string(),
            })
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect_to(cluster: &SimulatedCluster, identity: &str) -> Arc<dyn ChainConnection> {
        let chain = ReplicaChain::from_blocks(identity.split('!').map(str::to_string).collect());
        cluster.connect(&chain).await.unwrap()
    }

    /// A key whose slot falls inside the given window, by brute force.
    fn key_in(window: SlotRange) -> Bytes {
        for i in 0..100_000_u32 {
            let key = format!("probe-{i}");
            if window.contains(slot_hash(key.as_bytes())) {
                return Bytes::from(key);
            }
        }
        panic!("no key found in {window:?}");
    }

    #[tokio::test]
    async fn test_create_builds_uniform_table() {
        let cluster = SimulatedCluster::new();
        let options = CreateOptions::default().with_num_blocks(4);
        let status = cluster.create("/data", &options).await.unwrap();

        assert_eq!(status.chains.len(), 4);
        assert_eq!(status.chains[0].slots.begin, 0);
        assert_eq!(status.chains[3].slots.end, SLOT_MAX);
        for pair in status.chains.windows(2) {
            assert_eq!(pair[0].slots.end, pair[1].slots.begin);
        }
    }

    #[tokio::test]
    async fn test_create_existing_path_fails() {
        let cluster = SimulatedCluster::new();
        let options = CreateOptions::default();
        cluster.create("/data", &options).await.unwrap();

        let result = cluster.create("/data", &options).await;
        assert!(matches!(result, Err(RpcError::Directory { .. })));

        // open_or_create tolerates it.
        assert!(cluster.open_or_create("/data", &options).await.is_ok());
    }

    #[tokio::test]
    async fn test_commands_respect_ownership() {
        let cluster = SimulatedCluster::new();
        let options = CreateOptions::default().with_num_blocks(2);
        let status = cluster.create("/data", &options).await.unwrap();
        let ids = cluster.partition_ids("/data");

        let low_key = key_in(status.chains[0].slots);
        let conn = connect_to(&cluster, &ids[0]).await;

        let resp = conn
            .run_command(
                CommandId::Put,
                vec![low_key.clone(), Bytes::from_static(b"v")],
            )
            .await
            .unwrap();
        assert_eq!(resp[0], sentinel::OK.as_bytes());

        let resp = conn.run_command(CommandId::Get, vec![low_key.clone()]).await.unwrap();
        assert_eq!(resp[0], Bytes::from_static(b"v"));

        // The wrong partition reports a stale table.
        let wrong = connect_to(&cluster, &ids[1]).await;
        let resp = wrong.run_command(CommandId::Get, vec![low_key]).await.unwrap();
        assert_eq!(resp[0], sentinel::BLOCK_MOVED.as_bytes());
    }

    #[tokio::test]
    async fn test_batched_args_yield_one_response_per_operation() {
        let cluster = SimulatedCluster::new();
        let status = cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();
        let ids = cluster.partition_ids("/data");
        let conn = connect_to(&cluster, &ids[0]).await;

        let k1 = key_in(status.chains[0].slots);
        let k2 = {
            // A second distinct key in the same partition.
            let mut probe = key_in(status.chains[0].slots);
            let mut i = 0;
            while probe == k1 {
                probe = Bytes::from(format!("alt-{i}"));
                i += 1;
            }
            probe
        };

        let resp = conn
            .run_command(
                CommandId::Put,
                vec![
                    k1.clone(),
                    Bytes::from_static(b"v1"),
                    k2.clone(),
                    Bytes::from_static(b"v2"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(resp.len(), 2);

        let resp = conn.run_command(CommandId::Get, vec![k1, k2]).await.unwrap();
        assert_eq!(resp, vec![Bytes::from_static(b"v1"), Bytes::from_static(b"v2")]);
    }

    #[tokio::test]
    async fn test_export_moves_keys_and_redirects() {
        let cluster = SimulatedCluster::new();
        let status = cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();
        let ids = cluster.partition_ids("/data");
        let conn = connect_to(&cluster, &ids[0]).await;

        let full = status.chains[0].slots;
        let (_, moving) = full.split_at(full.begin + full.size() / 2);
        let key = key_in(moving);
        conn.run_command(CommandId::Put, vec![key.clone(), Bytes::from_static(b"v")])
            .await
            .unwrap();

        let importer = cluster.setup_importing("/data", moving);
        cluster.set_exporting(&ids[0], moving, &importer);

        // Key still local: served in place.
        let resp = conn.run_command(CommandId::Get, vec![key.clone()]).await.unwrap();
        assert_eq!(resp[0], Bytes::from_static(b"v"));

        cluster.export_slots(&ids[0]);
        assert_eq!(cluster.partition_len(&importer), 1);

        // Key gone: redirected to the importer.
        let resp = conn.run_command(CommandId::Get, vec![key.clone()]).await.unwrap();
        let signal = sentinel::decode_signal(&resp[0]).unwrap();
        assert_eq!(
            signal,
            sentinel::Signal::Exporting(ReplicaChain::from_blocks(vec![importer.clone()]))
        );

        // The importer only admits the slot with the redirected marker.
        let imp_conn = connect_to(&cluster, &importer).await;
        let resp = imp_conn
            .run_command(CommandId::Get, vec![key.clone()])
            .await
            .unwrap();
        assert_eq!(resp[0], sentinel::BLOCK_MOVED.as_bytes());

        let resp = imp_conn
            .run_command(
                CommandId::Get,
                vec![key, Bytes::from_static(sentinel::REDIRECTED.as_bytes())],
            )
            .await
            .unwrap();
        assert_eq!(resp[0], Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn test_lock_ack_names_export_target() {
        let cluster = SimulatedCluster::new();
        let status = cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();
        let ids = cluster.partition_ids("/data");
        let conn = connect_to(&cluster, &ids[0]).await;

        let resp = conn.run_command(CommandId::Lock, Vec::new()).await.unwrap();
        assert_eq!(sentinel::decode_lock_ack(&resp[0]).unwrap(), sentinel::LockAck::Held);
        assert!(cluster.is_locked(&ids[0]));

        conn.run_command(CommandId::Unlock, Vec::new()).await.unwrap();
        assert!(!cluster.is_locked(&ids[0]));

        let full = status.chains[0].slots;
        let (_, moving) = full.split_at(full.begin + full.size() / 2);
        let importer = cluster.setup_importing("/data", moving);
        cluster.set_exporting(&ids[0], moving, &importer);

        let resp = conn.run_command(CommandId::Lock, Vec::new()).await.unwrap();
        let ack = sentinel::decode_lock_ack(&resp[0]).unwrap();
        let sentinel::LockAck::Redirecting(chain) = ack else {
            panic!("expected redirecting ack, got {ack:?}");
        };
        assert_eq!(chain.identity(), importer);
        assert_eq!(cluster.lock_count(&ids[0]), 2);
    }

    #[tokio::test]
    async fn test_renewals_are_logged_and_faults_injected() {
        let cluster = SimulatedCluster::with_lease_period(250);
        cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();

        // Empty probe: period only, nothing logged.
        let ack = cluster.renew_leases(&[]).await.unwrap();
        assert_eq!(ack.renewed, 0);
        assert_eq!(ack.lease_period_ms, 250);
        assert!(cluster.renewal_log().is_empty());

        let paths = vec!["/data".to_string(), "/ghost".to_string()];
        let ack = cluster.renew_leases(&paths).await.unwrap();
        assert_eq!(ack.renewed, 1);
        assert_eq!(cluster.renewal_log(), vec![paths.clone()]);

        cluster.fail_next_renewal();
        assert!(cluster.renew_leases(&paths).await.is_err());
        assert!(cluster.renew_leases(&paths).await.is_ok());

        cluster.set_fail_renewals(true);
        assert!(cluster.renew_leases(&paths).await.is_err());
        assert!(cluster.renew_leases(&paths).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_all_takes_a_prefix() {
        let cluster = SimulatedCluster::new();
        let options = CreateOptions::default();
        cluster.create("/a/b", &options).await.unwrap();
        cluster.create("/a/c", &options).await.unwrap();
        cluster.create("/x", &options).await.unwrap();

        cluster.remove_all("/a").await.unwrap();
        assert!(matches!(
            cluster.open("/a/b").await,
            Err(RpcError::PathNotFound { .. })
        ));
        assert!(cluster.open("/x").await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_moves_the_entry() {
        let cluster = SimulatedCluster::new();
        let options = CreateOptions::default();
        cluster.create("/old", &options).await.unwrap();

        cluster.rename("/old", "/new").await.unwrap();
        assert!(cluster.open("/new").await.is_ok());
        assert!(matches!(
            cluster.open("/old").await,
            Err(RpcError::PathNotFound { .. })
        ));

        cluster.create("/other", &options).await.unwrap();
        assert!(cluster.rename("/new", "/other").await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_calls_are_recorded() {
        let cluster = SimulatedCluster::new();
        cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();

        cluster.sync("/data", "local://tmp").await.unwrap();
        cluster.dump("/data", "s3://bucket").await.unwrap();
        assert!(cluster.load("/missing", "local://tmp").await.is_err());

        let calls = cluster.fs_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "sync");
        assert_eq!(calls[1], ("dump", "/data".to_string(), "s3://bucket".to_string()));
    }

    #[tokio::test]
    async fn test_injected_command_failure_is_one_shot() {
        let cluster = SimulatedCluster::new();
        let status = cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();
        let ids = cluster.partition_ids("/data");
        let conn = connect_to(&cluster, &ids[0]).await;
        let key = key_in(status.chains[0].slots);

        cluster.fail_next_command(&ids[0]);
        let result = conn.run_command(CommandId::Exists, vec![key.clone()]).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed { .. })));

        let resp = conn.run_command(CommandId::Exists, vec![key]).await.unwrap();
        assert_eq!(resp[0], Bytes::from_static(b"false"));
    }

    #[tokio::test]
    async fn test_connect_to_unknown_chain_fails() {
        let cluster = SimulatedCluster::new();
        let chain = ReplicaChain::from_blocks(vec!["nowhere".to_string()]);
        let result = cluster.connect(&chain).await;
        assert!(matches!(result, Err(RpcError::ConnectFailed { .. })));
    }
}
