//! RPC error types.

use thiserror::Error;

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors crossing the client/cluster boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    /// A connection to a partition could not be opened.
    #[error("connect failed for chain {chain}: {message}")]
    ConnectFailed {
        /// Identity of the chain.
        chain: String,
        /// What went wrong.
        message: String,
    },

    /// A connection dropped mid-exchange.
    #[error("connection to {chain} closed: {message}")]
    ConnectionClosed {
        /// Identity of the chain.
        chain: String,
        /// What went wrong.
        message: String,
    },

    /// An exchange did not complete in time.
    #[error("timeout: {operation} after {waited_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// How long we waited.
        waited_ms: u64,
    },

    /// The directory has no entry for the path.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The missing path.
        path: String,
    },

    /// The directory service rejected an operation.
    #[error("directory error for {path}: {message}")]
    Directory {
        /// The path the operation addressed.
        path: String,
        /// Why it was rejected.
        message: String,
    },

    /// A lease renewal round failed.
    #[error("lease renewal failed: {message}")]
    Lease {
        /// What went wrong.
        message: String,
    },

    /// A response violated the protocol.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// What was wrong with it.
        message: String,
    },
}
