//! Client configuration.

use std::time::Duration;

/// Configuration for a [`StoreClient`](crate::StoreClient) and the
/// per-data-set clients it hands out.
///
/// Timeouts are fixed at client construction; individual operations do
/// not carry their own deadlines.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for establishing a connection to a replica chain.
    pub connect_timeout: Duration,
    /// Timeout for one request/response exchange on a connection.
    pub request_timeout: Duration,
    /// Fallback lease renewal cadence, used until the lease service
    /// advertises its own period.
    pub lease_period: Duration,
    /// How many table refreshes a single operation may consume before
    /// it fails as persistently stale.
    pub table_refresh_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            lease_period: Duration::from_secs(10),
            table_refresh_limit: 8,
        }
    }
}

impl ClientConfig {
    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the fallback lease renewal cadence.
    #[must_use]
    pub fn with_lease_period(mut self, period: Duration) -> Self {
        self.lease_period = period;
        self
    }

    /// Sets the stale-table refresh bound.
    #[must_use]
    pub fn with_table_refresh_limit(mut self, limit: u32) -> Self {
        self.table_refresh_limit = limit;
        self
    }

    /// Creates a configuration suitable for testing (faster timeouts).
    #[must_use]
    pub fn fast_for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_secs(1),
            lease_period: Duration::from_millis(50),
            table_refresh_limit: 4,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                message: "timeouts must be non-zero".to_string(),
            });
        }

        if self.lease_period.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                message: "lease_period must be non-zero".to_string(),
            });
        }

        // A zero bound would fail every operation before its first attempt.
        if self.table_refresh_limit == 0 {
            return Err(ConfigError::InvalidLimit {
                message: "table_refresh_limit must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A timeout or period is out of range.
    #[error("invalid timeout: {message}")]
    InvalidTimeout {
        /// Error description.
        message: String,
    },
    /// A retry or size bound is out of range.
    #[error("invalid limit: {message}")]
    InvalidLimit {
        /// Error description.
        message: String,
    },
}
