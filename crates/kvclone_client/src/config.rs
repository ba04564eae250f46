//! Configuration for the clone client.

use crate::error::{ClientError, ClientResult};
use kvclone_codec::MAX_KEY_LEN;
use kvclone_transport::Endpoint;
use rand::Rng;
use std::time::Duration;

/// How `set` and `delete` reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Push writes to the server. They show up locally once the server
    /// publishes them back.
    #[default]
    Push,
    /// Apply writes to the local store only.
    LocalOnly,
}

/// Configuration for the clone client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoints, tried in round-robin order.
    pub endpoints: Vec<Endpoint>,
    /// Key prefix to replicate. Empty replicates every key.
    pub subtree: String,
    /// Interval at which servers send heartbeats.
    pub heartbeat_interval: Duration,
    /// Missed heartbeat intervals before a server is declared dead.
    pub liveness_factor: u32,
    /// Write mode.
    pub write_mode: WriteMode,
    /// Reconnect backoff.
    pub retry: RetryConfig,
    /// Capacity of the command channel between handle and agent.
    pub command_capacity: usize,
    /// Maximum writes queued while not subscribed.
    pub max_pending_writes: usize,
    /// Maximum live updates held back while a snapshot is loading. A longer
    /// backlog drops the session and resyncs.
    pub max_buffered_updates: usize,
    /// Maximum key length in bytes.
    pub max_key_len: usize,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoints.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
            subtree: String::new(),
            heartbeat_interval: Duration::from_secs(1),
            liveness_factor: 3,
            write_mode: WriteMode::Push,
            retry: RetryConfig::default(),
            command_capacity: 64,
            max_pending_writes: 1024,
            max_buffered_updates: 10_000,
            max_key_len: MAX_KEY_LEN,
        }
    }

    /// Adds an endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Sets the subtree.
    pub fn with_subtree(mut self, subtree: impl Into<String>) -> Self {
        self.subtree = subtree.into();
        self
    }

    /// Sets the expected heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the liveness factor.
    pub fn with_liveness_factor(mut self, factor: u32) -> Self {
        self.liveness_factor = factor;
        self
    }

    /// Sets the write mode.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Sets the reconnect backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the command channel capacity.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Sets the pending write limit.
    pub fn with_max_pending_writes(mut self, max: usize) -> Self {
        self.max_pending_writes = max;
        self
    }

    /// Sets the limit on updates buffered during a snapshot.
    pub fn with_max_buffered_updates(mut self, max: usize) -> Self {
        self.max_buffered_updates = max;
        self
    }

    /// Sets the maximum key length.
    pub fn with_max_key_len(mut self, max: usize) -> Self {
        self.max_key_len = max;
        self
    }

    /// Returns how long a server may stay silent before it is declared dead.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.liveness_factor)
    }

    /// Checks the configuration for values the client cannot run with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.endpoints.is_empty() {
            return Err(ClientError::Config("at least one endpoint is required".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ClientError::Config("heartbeat interval must be non-zero".into()));
        }
        if self.liveness_factor == 0 {
            return Err(ClientError::Config("liveness factor must be non-zero".into()));
        }
        if self.command_capacity == 0 {
            return Err(ClientError::Config("command capacity must be non-zero".into()));
        }
        if self.max_buffered_updates == 0 {
            return Err(ClientError::Config(
                "buffered update limit must be non-zero".into(),
            ));
        }
        self.retry.validate()?;
        if self.subtree.len() > self.max_key_len {
            return Err(ClientError::Config(format!(
                "subtree is {} bytes, longer than the {} byte key limit",
                self.subtree.len(),
                self.max_key_len
            )));
        }
        Ok(())
    }
}

/// Configuration for reconnect backoff.
///
/// Reconnects never give up; the delay grows per endpoint with consecutive
/// failures and resets after a successful sync.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration starting at `initial_delay`.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries at a fixed delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Checks for backoff settings that cannot produce a delay.
    pub fn validate(&self) -> ClientResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ClientError::Config(format!(
                "backoff multiplier must be a finite number of at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(ClientError::Config(format!(
                "max retry delay {:?} is shorter than the initial delay {:?}",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    /// Calculates the delay after `failures` consecutive failures.
    ///
    /// Never exceeds `max_delay` plus jitter, even for settings that
    /// [`RetryConfig::validate`] rejects.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(failures.saturating_sub(1).min(i32::MAX as u32) as i32);

        let max_secs = self.max_delay.as_secs_f64();
        let delay_secs = if base_delay.is_nan() {
            max_secs
        } else {
            base_delay.clamp(0.0, max_secs)
        };

        let delay_secs = if self.add_jitter {
            // Add up to 25% jitter
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new([Endpoint::inproc("a")])
            .with_endpoint(Endpoint::inproc("b"))
            .with_subtree("prod.")
            .with_heartbeat_interval(Duration::from_millis(200))
            .with_liveness_factor(5)
            .with_write_mode(WriteMode::LocalOnly)
            .with_max_pending_writes(8);

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.subtree, "prod.");
        assert_eq!(config.write_mode, WriteMode::LocalOnly);
        assert_eq!(config.max_pending_writes, 8);
        assert_eq!(config.liveness_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::new([Endpoint::inproc("a")]);
        assert_eq!(config.write_mode, WriteMode::Push);
        assert_eq!(config.subtree, "");
        assert_eq!(config.liveness_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn invalid_configs() {
        let no_endpoints = ClientConfig::new(Vec::<Endpoint>::new());
        assert!(matches!(no_endpoints.validate(), Err(ClientError::Config(_))));

        let base = ClientConfig::new([Endpoint::inproc("a")]);
        assert!(base
            .clone()
            .with_heartbeat_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(base.clone().with_liveness_factor(0).validate().is_err());
        assert!(base
            .clone()
            .with_max_key_len(4)
            .with_subtree("toolong.")
            .validate()
            .is_err());
    }

    #[test]
    fn invalid_retry_rejected() {
        let base = ClientConfig::new([Endpoint::inproc("a")]);
        for multiplier in [f64::NAN, f64::INFINITY, -1.0, 0.5] {
            let retry = RetryConfig::new(Duration::from_millis(100))
                .with_backoff_multiplier(multiplier);
            let result = base.clone().with_retry(retry).validate();
            assert!(
                matches!(result, Err(ClientError::Config(_))),
                "multiplier {} accepted",
                multiplier
            );
        }

        let inverted = RetryConfig::new(Duration::from_secs(10)).with_max_delay(Duration::from_secs(1));
        assert!(matches!(
            base.clone().with_retry(inverted).validate(),
            Err(ClientError::Config(_))
        ));

        assert!(base.with_max_buffered_updates(0).validate().is_err());
    }

    #[test]
    fn retry_delay_never_panics() {
        let nan = RetryConfig::new(Duration::from_millis(100)).with_backoff_multiplier(f64::NAN);
        let negative = RetryConfig::new(Duration::from_millis(100)).with_backoff_multiplier(-3.0);
        let huge = RetryConfig::new(Duration::from_millis(100))
            .with_backoff_multiplier(f64::INFINITY)
            .with_max_delay(Duration::MAX);
        for attempt in [1, 2, 3, 1000, u32::MAX] {
            assert!(nan.delay_for_attempt(attempt) <= Duration::from_secs(38));
            assert!(negative.delay_for_attempt(attempt) <= Duration::from_secs(38));
            let _ = huge.delay_for_attempt(attempt);
        }
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_capped() {
        let config = RetryConfig::new(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn retry_jitter_bounded() {
        let config = RetryConfig::new(Duration::from_millis(100));
        for _ in 0..32 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn fixed_retry() {
        let config = RetryConfig::fixed(Duration::from_millis(50));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(config.delay_for_attempt(7), Duration::from_millis(50));
    }
}
