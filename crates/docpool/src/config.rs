//! Pool configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::uri::ConnectionUri;

/// Default database used for the liveness probe.
pub const DEFAULT_PROBE_DATABASE: &str = "admin";

/// Configuration for the connection pool.
///
/// Start from [`PoolConfig::new`] and chain the setters; options found in
/// the connection URI are layered on top by [`PoolConfig::apply_uri_options`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Connections to pre-create when the pool is built.
    ///
    /// This is a warm-up hint, not a floor: the pool does not replace
    /// connections to stay above it. A warm-up connection whose first
    /// probe fails for any reason, transient or not, is destroyed rather
    /// than quarantined and its slot is returned; warm-up then stops.
    pub min_connections: u32,

    /// Maximum number of connections that may exist at once.
    pub max_connections: u32,

    /// First backoff delay after a transient probe failure.
    pub retry_base_delay: Duration,

    /// Upper bound for a single backoff delay.
    pub max_retry_delay: Duration,

    /// Total backoff one acquire may sleep before giving up.
    ///
    /// The final delay is shortened so the acquire sleeps the whole budget,
    /// then fails with [`PoolError::PoolExhausted`] on the next transient
    /// failure.
    pub retry_timeout: Duration,

    /// Maximum time to wait for a free slot, or `None` to wait forever.
    pub acquire_timeout: Option<Duration>,

    /// Database the liveness probe is issued against.
    pub probe_database: Arc<str>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            retry_base_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_secs(30),
            retry_timeout: Duration::from_secs(600),
            acquire_timeout: None,
            probe_database: Arc::from(DEFAULT_PROBE_DATABASE),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections to pre-create.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the first backoff delay.
    #[must_use]
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the ceiling for a single backoff delay.
    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Set the cumulative backoff budget for one acquire.
    #[must_use]
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Set the maximum time to wait for a free slot.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.acquire_timeout = timeout.into();
        self
    }

    /// Set the database the liveness probe runs against.
    #[must_use]
    pub fn probe_database(mut self, database: impl Into<Arc<str>>) -> Self {
        self.probe_database = database.into();
        self
    }

    /// Overlay pool options found in a connection URI.
    ///
    /// Recognized keys: `maxPoolSize`, `minPoolSize`,
    /// `waitQueueTimeoutMS` and `retryTimeoutMS`. Other options are left
    /// for the driver.
    pub fn apply_uri_options(mut self, uri: &ConnectionUri) -> Result<Self, PoolError> {
        if let Some(value) = uri.option("maxPoolSize") {
            self.max_connections = parse_option("maxPoolSize", value)?;
        }
        if let Some(value) = uri.option("minPoolSize") {
            self.min_connections = parse_option("minPoolSize", value)?;
        }
        if let Some(value) = uri.option("waitQueueTimeoutMS") {
            let millis: u64 = parse_option("waitQueueTimeoutMS", value)?;
            // Zero means "wait forever" in the URI convention.
            self.acquire_timeout = (millis > 0).then_some(Duration::from_millis(millis));
        }
        if let Some(value) = uri.option("retryTimeoutMS") {
            let millis: u64 = parse_option("retryTimeoutMS", value)?;
            self.retry_timeout = Duration::from_millis(millis);
        }
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "pool capacity (max_connections) cannot be zero".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections exceeds pool capacity".into(),
            ));
        }
        if self.retry_base_delay.is_zero() {
            return Err(PoolError::Configuration(
                "retry_base_delay must be greater than 0".into(),
            ));
        }
        if self.max_retry_delay < self.retry_base_delay {
            return Err(PoolError::Configuration(
                "max_retry_delay cannot be less than retry_base_delay".into(),
            ));
        }
        if self.acquire_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".into(),
            ));
        }
        if self.probe_database.is_empty() {
            return Err(PoolError::Configuration(
                "probe_database cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

fn parse_option<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid value for {key}: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.retry_base_delay, Duration::from_millis(5));
        assert_eq!(config.retry_timeout, Duration::from_secs(600));
        assert!(config.acquire_timeout.is_none());
        assert_eq!(&*config.probe_database, DEFAULT_PROBE_DATABASE);
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(50)
            .retry_base_delay(Duration::from_millis(10))
            .max_retry_delay(Duration::from_secs(1))
            .retry_timeout(Duration::from_secs(60))
            .acquire_timeout(Duration::from_secs(5))
            .probe_database("test");

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
        assert_eq!(config.max_retry_delay, Duration::from_secs(1));
        assert_eq!(config.retry_timeout, Duration::from_secs(60));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(5)));
        assert_eq!(&*config.probe_database, "test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_max() {
        let mut config = PoolConfig::new();
        config.max_connections = 0;

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("pool capacity (max_connections) cannot be zero")
        );
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = PoolConfig::new().min_connections(20).max_connections(10);

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("min_connections exceeds pool capacity")
        );
    }

    #[test]
    fn test_config_validation_backoff_bounds() {
        let config = PoolConfig::new().retry_base_delay(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = PoolConfig::new()
            .retry_base_delay(Duration::from_secs(2))
            .max_retry_delay(Duration::from_secs(1));
        assert!(config.validate().is_err());

        let config = PoolConfig::new().acquire_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_equal_min_max() {
        let config = PoolConfig::new().min_connections(5).max_connections(5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_uri_options() {
        let uri = ConnectionUri::parse(
            "mongodb://localhost/?maxPoolSize=4&minPoolSize=2&waitQueueTimeoutMS=250&retryTimeoutMS=1000&w=majority",
        )
        .unwrap();
        let config = PoolConfig::new().apply_uri_options(&uri).unwrap();

        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.retry_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_apply_uri_options_zero_wait_means_forever() {
        let uri = ConnectionUri::parse("mongodb://localhost/?waitQueueTimeoutMS=0").unwrap();
        let config = PoolConfig::new()
            .acquire_timeout(Duration::from_secs(1))
            .apply_uri_options(&uri)
            .unwrap();
        assert!(config.acquire_timeout.is_none());
    }

    #[test]
    fn test_apply_uri_options_rejects_garbage() {
        let uri = ConnectionUri::parse("mongodb://localhost/?maxPoolSize=lots").unwrap();
        let err = PoolConfig::new().apply_uri_options(&uri).unwrap_err();
        assert!(err.to_string().contains("maxPoolSize"));
    }
}
