//! Per-chain command execution.
//!
//! [`ChainClient`] wraps one cached connection with the request timeout
//! fixed at client construction. [`LockedChain`] is the handle a
//! successful LOCK acknowledgement turns it into; the acknowledgement
//! also names the migration successor when the partition is mid-export,
//! which locked sessions use to discover what else to lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strand_core::ReplicaChain;
use strand_rpc::{sentinel, ChainConnection, CommandId, RpcError, RpcResult};

use crate::error::{ClientError, ClientResult};

/// Command execution against one replica chain.
pub struct ChainClient {
    /// The chain this client talks to.
    chain: ReplicaChain,
    /// Cached connection to the chain.
    connection: Arc<dyn ChainConnection>,
    /// Upper bound on one exchange over the connection.
    request_timeout: Duration,
}

impl ChainClient {
    /// Creates a client over an established connection.
    #[must_use]
    pub fn new(
        chain: ReplicaChain,
        connection: Arc<dyn ChainConnection>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            connection,
            request_timeout,
        }
    }

    /// The chain this client talks to.
    #[must_use]
    pub fn chain(&self) -> &ReplicaChain {
        &self.chain
    }

    /// The chain's identity string.
    #[must_use]
    pub fn identity(&self) -> String {
        self.chain.identity()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = RpcResult<T>> + Send,
    ) -> ClientResult<T> {
        match tokio::time::timeout(self.request_timeout, work).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Rpc(RpcError::Timeout {
                operation,
                waited_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            })),
        }
    }

    /// Runs one command and waits for its responses.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn run_command(
        &self,
        op: CommandId,
        args: Vec<Bytes>,
    ) -> ClientResult<Vec<Bytes>> {
        self.bounded("run_command", self.connection.run_command(op, args))
            .await
    }

    /// Runs one command with the trailing redirected marker, admitting
    /// keys the destination is still importing.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn run_command_redirected(
        &self,
        op: CommandId,
        mut args: Vec<Bytes>,
    ) -> ClientResult<Vec<Bytes>> {
        args.push(Bytes::from_static(sentinel::REDIRECTED.as_bytes()));
        self.run_command(op, args).await
    }

    /// Sends one request without waiting for its responses.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn send(&self, op: CommandId, args: Vec<Bytes>) -> ClientResult<()> {
        self.bounded("send_request", self.connection.send_request(op, args))
            .await
    }

    /// Receives the responses to the oldest unanswered request.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn recv(&self) -> ClientResult<Vec<Bytes>> {
        self.bounded("recv_response", self.connection.recv_response())
            .await
    }

    /// Acquires the partition lock, turning this client into a locked
    /// handle.
    ///
    /// # Errors
    /// Returns an error on transport failure or a malformed
    /// acknowledgement.
    pub async fn lock(self) -> ClientResult<LockedChain> {
        let responses = self.run_command(CommandId::Lock, Vec::new()).await?;
        let head = responses
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::MalformedPayload {
                message: "empty lock acknowledgement".to_string(),
            })?;
        let redirect_target = match sentinel::decode_lock_ack(&head)? {
            sentinel::LockAck::Held => None,
            sentinel::LockAck::Redirecting(chain) => Some(chain),
        };
        Ok(LockedChain {
            inner: self,
            redirect_target,
        })
    }
}

/// A chain whose partition lock this client holds.
pub struct LockedChain {
    inner: ChainClient,
    /// Successor named by the lock acknowledgement, when the partition
    /// was mid-export at lock time.
    redirect_target: Option<ReplicaChain>,
}

impl LockedChain {
    /// The locked chain.
    #[must_use]
    pub fn chain(&self) -> &ReplicaChain {
        self.inner.chain()
    }

    /// The locked chain's identity string.
    #[must_use]
    pub fn identity(&self) -> String {
        self.inner.identity()
    }

    /// Whether the partition was redirecting when locked.
    #[must_use]
    pub fn is_redirecting(&self) -> bool {
        self.redirect_target.is_some()
    }

    /// The successor the partition is redirecting to, if any.
    #[must_use]
    pub fn redirect_target(&self) -> Option<&ReplicaChain> {
        self.redirect_target.as_ref()
    }

    /// Runs one command on the locked chain.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn run_command(
        &self,
        op: CommandId,
        args: Vec<Bytes>,
    ) -> ClientResult<Vec<Bytes>> {
        self.inner.run_command(op, args).await
    }

    /// Runs one command with the redirected marker on the locked chain.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn run_command_redirected(
        &self,
        op: CommandId,
        args: Vec<Bytes>,
    ) -> ClientResult<Vec<Bytes>> {
        self.inner.run_command_redirected(op, args).await
    }

    /// Sends one request on the locked chain without waiting for its
    /// responses.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn send(&self, op: CommandId, args: Vec<Bytes>) -> ClientResult<()> {
        self.inner.send(op, args).await
    }

    /// Receives the responses to the oldest unanswered request.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn recv(&self) -> ClientResult<Vec<Bytes>> {
        self.inner.recv().await
    }

    /// Releases the partition lock.
    ///
    /// # Errors
    /// Returns an error on transport failure or timeout.
    pub async fn unlock(&self) -> ClientResult<()> {
        let responses = self.inner.run_command(CommandId::Unlock, Vec::new()).await?;
        if responses.is_empty() {
            return Err(ClientError::MalformedPayload {
                message: "empty unlock acknowledgement".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records sent requests; replies with a fixed response.
    struct ScriptedConnection {
        sent: Mutex<Vec<(CommandId, Vec<Bytes>)>>,
        reply: Bytes,
    }

    impl ScriptedConnection {
        fn replying(reply: Bytes) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                reply,
            })
        }
    }

    #[async_trait]
    impl ChainConnection for ScriptedConnection {
        async fn send_request(&self, op: CommandId, args: Vec<Bytes>) -> RpcResult<()> {
            self.sent.lock().unwrap().push((op, args));
            Ok(())
        }

        async fn recv_response(&self) -> RpcResult<Vec<Bytes>> {
            Ok(vec![self.reply.clone()])
        }
    }

    /// Accepts sends but never produces a response.
    struct StallingConnection;

    #[async_trait]
    impl ChainConnection for StallingConnection {
        async fn send_request(&self, _op: CommandId, _args: Vec<Bytes>) -> RpcResult<()> {
            Ok(())
        }

        async fn recv_response(&self) -> RpcResult<Vec<Bytes>> {
            std::future::pending().await
        }
    }

    fn test_chain() -> ReplicaChain {
        ReplicaChain::from_blocks(vec!["block-a".to_string()])
    }

    #[tokio::test]
    async fn test_redirected_resend_appends_the_marker() {
        let connection = ScriptedConnection::replying(Bytes::from_static(b"value"));
        let client = ChainClient::new(
            test_chain(),
            Arc::clone(&connection) as Arc<dyn ChainConnection>,
            Duration::from_secs(1),
        );

        client
            .run_command_redirected(CommandId::Get, vec![Bytes::from_static(b"key")])
            .await
            .unwrap();

        let sent = connection.sent.lock().unwrap();
        let (op, args) = &sent[0];
        assert_eq!(*op, CommandId::Get);
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], sentinel::REDIRECTED.as_bytes());
    }

    #[tokio::test]
    async fn test_request_timeout_fires() {
        let client = ChainClient::new(
            test_chain(),
            Arc::new(StallingConnection),
            Duration::from_millis(20),
        );

        let result = client
            .run_command(CommandId::Get, vec![Bytes::from_static(b"key")])
            .await;
        assert!(matches!(
            result,
            Err(ClientError::Rpc(RpcError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_decodes_held_acknowledgement() {
        let connection =
            ScriptedConnection::replying(Bytes::from_static(sentinel::OK.as_bytes()));
        let client = ChainClient::new(
            test_chain(),
            connection as Arc<dyn ChainConnection>,
            Duration::from_secs(1),
        );

        let locked = client.lock().await.unwrap();
        assert!(!locked.is_redirecting());
        assert!(locked.redirect_target().is_none());
        locked.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_decodes_redirecting_acknowledgement() {
        let successor = ReplicaChain::from_blocks(vec!["block-b".to_string()]);
        let connection = ScriptedConnection::replying(sentinel::encode_redirecting(&successor));
        let client = ChainClient::new(
            test_chain(),
            connection as Arc<dyn ChainConnection>,
            Duration::from_secs(1),
        );

        let locked = client.lock().await.unwrap();
        assert!(locked.is_redirecting());
        assert_eq!(locked.redirect_target().unwrap().identity(), "block-b");
    }
}
