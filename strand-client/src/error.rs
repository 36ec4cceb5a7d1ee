//! Client error types.

use thiserror::Error;

use strand_rpc::RpcError;

use crate::config::ConfigError;

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A collaborator RPC failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The client was misconfigured.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller passed arguments the operation cannot accept.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the arguments.
        message: String,
    },

    /// The directory service returned a partition table that cannot
    /// route.
    #[error("invalid partition table for {path}: {message}")]
    InvalidTable {
        /// Data set path the table was fetched for.
        path: String,
        /// What was wrong with the table.
        message: String,
    },

    /// The table stayed stale through the configured number of refreshes.
    #[error("partition table still stale after {refreshes} refreshes")]
    StaleTable {
        /// Refreshes consumed before giving up.
        refreshes: u32,
    },

    /// A locked-session guarantee was violated.
    #[error("lock protocol violation: {message}")]
    LockProtocol {
        /// What the session observed.
        message: String,
    },

    /// A response payload could not be decoded.
    #[error("malformed payload: {message}")]
    MalformedPayload {
        /// What failed to decode.
        message: String,
    },
}
