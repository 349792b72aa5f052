use std::time::Duration;

/// Connection settings for the Pub/Sub API.
///
/// # Examples
///
/// ```
/// use salesforce_stream::pubsub::Config;
/// use std::time::Duration;
///
/// let config = Config::default()
///     .endpoint("https://api.deu.pubsub.salesforce.com:7443")
///     .appetite(100)
///     .call_timeout(Duration::from_secs(10));
/// assert_eq!(config.appetite, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// gRPC endpoint URL.
    pub endpoint: String,
    /// Number of events requested per fetch request.
    pub appetite: i32,
    /// Timeout for unary calls (`GetTopic`, `GetSchema`, `Publish`).
    pub call_timeout: Duration,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: salesforce_pubsub_v1::eventbus::ENDPOINT.to_string(),
            appetite: crate::DEFAULT_APPETITE,
            call_timeout: Duration::from_secs(crate::DEFAULT_CALL_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Sets the gRPC endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the flow-control batch size. Values below 1 are raised to 1.
    pub fn appetite(mut self, appetite: i32) -> Self {
        self.appetite = appetite.max(1);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
