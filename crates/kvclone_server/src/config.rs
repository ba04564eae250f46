//! Server configuration.

use crate::error::{ServerError, ServerResult};
use kvclone_codec::MAX_KEY_LEN;
use kvclone_core::DEFAULT_SCAN_INTERVAL;
use kvclone_transport::Endpoint;
use std::time::Duration;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the state server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Endpoint to bind to.
    pub endpoint: Endpoint,
    /// Interval between heartbeats on the publish channel.
    pub heartbeat_interval: Duration,
    /// Interval between TTL scans.
    pub ttl_scan_interval: Duration,
    /// Maximum accepted key length in bytes.
    pub max_key_len: usize,
    /// Capacity of the control channel behind `ServerHandle`.
    pub control_capacity: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            ttl_scan_interval: DEFAULT_SCAN_INTERVAL,
            max_key_len: MAX_KEY_LEN,
            control_capacity: 64,
        }
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the TTL scan interval.
    pub fn with_ttl_scan_interval(mut self, interval: Duration) -> Self {
        self.ttl_scan_interval = interval;
        self
    }

    /// Sets the maximum key length.
    pub fn with_max_key_len(mut self, max: usize) -> Self {
        self.max_key_len = max;
        self
    }

    /// Sets the control channel capacity.
    pub fn with_control_capacity(mut self, capacity: usize) -> Self {
        self.control_capacity = capacity;
        self
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(ServerError::Config("heartbeat interval must be non-zero".into()));
        }
        if self.ttl_scan_interval.is_zero() {
            return Err(ServerError::Config("ttl scan interval must be non-zero".into()));
        }
        if self.max_key_len == 0 {
            return Err(ServerError::Config("max key length must be non-zero".into()));
        }
        if self.control_capacity == 0 {
            return Err(ServerError::Config("control capacity must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Endpoint::tcp("*", 5556))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.endpoint, Endpoint::tcp("*", 5556));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.max_key_len, 255);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new(Endpoint::inproc("state"))
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_ttl_scan_interval(Duration::from_millis(50))
            .with_max_key_len(16);

        assert_eq!(config.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(config.ttl_scan_interval, Duration::from_millis(50));
        assert_eq!(config.max_key_len, 16);
    }

    #[test]
    fn zero_intervals_rejected() {
        let config = ServerConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert!(config.validate().unwrap_err().is_config_error());

        let config = ServerConfig::default().with_ttl_scan_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = ServerConfig::default().with_max_key_len(0);
        assert!(config.validate().is_err());
    }
}
