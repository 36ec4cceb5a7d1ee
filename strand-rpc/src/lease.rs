//! The lease service seam.
//!
//! Every open path is a lease the client must renew periodically or the
//! cluster reclaims its storage. The service advertises the renewal
//! period in each acknowledgement so clients track the server's setting
//! rather than configuring their own.

use async_trait::async_trait;

use crate::error::RpcResult;

/// Acknowledgement of one renewal round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseAck {
    /// Number of leases the service renewed.
    pub renewed: u64,
    /// Current lease period; renew again within this window.
    pub lease_period_ms: u64,
}

/// The lease-renewal service.
#[async_trait]
pub trait LeaseService: Send + Sync {
    /// Renews the lease of every path in `paths`.
    ///
    /// An empty `paths` renews nothing and is the idiomatic way to learn
    /// the current lease period.
    ///
    /// # Errors
    ///
    /// Returns an error if the renewal round fails; individual unknown
    /// paths are not errors and are simply not counted in
    /// [`LeaseAck::renewed`].
    async fn renew_leases(&self, paths: &[String]) -> RpcResult<LeaseAck>;
}
