//! Command transport to a single partition.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use strand_core::ReplicaChain;

use crate::command::CommandId;
use crate::error::RpcResult;

/// A command channel to one replica chain.
///
/// Responses arrive in request order, which is what makes the split
/// [`send_request`](Self::send_request) / [`recv_response`](Self::recv_response)
/// pair usable for pipelining: send to several partitions first, then
/// collect every response. Callers must not interleave pipelined
/// exchanges on one connection from concurrent tasks.
#[async_trait]
pub trait ChainConnection: Send + Sync {
    /// Sends a command without waiting for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    async fn send_request(&self, op: CommandId, args: Vec<Bytes>) -> RpcResult<()>;

    /// Receives the response to the oldest outstanding request.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    async fn recv_response(&self) -> RpcResult<Vec<Bytes>>;

    /// Runs one command and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    async fn run_command(&self, op: CommandId, args: Vec<Bytes>) -> RpcResult<Vec<Bytes>> {
        self.send_request(op, args).await?;
        self.recv_response().await
    }
}

/// Opens connections to replica chains.
///
/// The connector is the seam between the client and the wire: production
/// implementations dial the chain's blocks, while
/// [`SimulatedCluster`](crate::SimulatedCluster) hands out in-memory
/// connections.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Opens a connection to the given chain.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RpcError::ConnectFailed`] if the chain cannot be
    /// reached.
    async fn connect(&self, chain: &ReplicaChain) -> RpcResult<Arc<dyn ChainConnection>>;
}
