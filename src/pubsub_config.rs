//! Public, backend-agnostic manager configuration.
//!
//! Backends read only the fields that concern them; the memory backend, for
//! instance, ignores host, port and pool settings.

use std::time::Duration;

use crate::{Error, Result, RetryConfig};

/// Which backend [`connect`](crate::connect) builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// A single Redis server.
    Standalone,

    /// A Redis cluster reached through one seed node.
    Cluster,

    /// The in-process hub. No network.
    Memory,
}

/// Manager configuration and connection parameters.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    // ---
    /// Identifier prefixed to every log line of this manager.
    pub manager_id: String,

    /// Backend selection.
    pub backend: BackendKind,

    /// Seed node host name or address.
    pub host: String,

    /// Seed node port.
    pub port: u16,

    /// Keep idle TCP connections alive.
    ///
    /// The `redis` crate turns keep-alive on for every socket it opens and
    /// offers no per-connection switch, so the redis backends accept only
    /// `true` here (see [`validate`](Self::validate)). The memory backend
    /// ignores it.
    pub keep_alive: bool,

    /// Upper bound for establishing a single connection.
    pub connect_timeout: Duration,

    /// Number of publish connections.
    pub pool_size: usize,

    /// How long a publish may wait for a free pooled connection.
    pub pool_wait_timeout: Duration,

    /// How long one consume cycle waits for an incoming message.
    ///
    /// This also bounds how long `stop_consuming` can take.
    pub consume_timeout: Duration,

    /// Pause after a consume error that is not a timeout.
    pub error_pause: Duration,

    /// Publish retry policy.
    pub retry: RetryConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        // ---
        Self {
            manager_id: "pubsub".to_string(),
            backend: BackendKind::Cluster,
            host: "127.0.0.1".to_string(),
            port: 6379,
            keep_alive: true,
            connect_timeout: Duration::from_millis(200),
            pool_size: 2,
            pool_wait_timeout: Duration::from_millis(200),
            consume_timeout: Duration::from_millis(100),
            error_pause: Duration::from_millis(500),
            retry: RetryConfig::default(),
        }
    }
}

impl PubSubConfig {
    /// Configuration for a Redis cluster reached through `host:port`.
    pub fn cluster(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Configuration for a single Redis server.
    pub fn standalone(host: impl Into<String>, port: u16) -> Self {
        Self {
            backend: BackendKind::Standalone,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Configuration for the in-process memory backend (no broker).
    pub fn memory(manager_id: impl Into<String>) -> Self {
        Self {
            manager_id: manager_id.into(),
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Set the log prefix.
    pub fn with_manager_id(mut self, id: impl Into<String>) -> Self {
        self.manager_id = id.into();
        self
    }

    /// Set the per-connection connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the publish pool size and the wait bound for a free connection.
    pub fn with_pool(mut self, size: usize, wait_timeout: Duration) -> Self {
        self.pool_size = size;
        self.pool_wait_timeout = wait_timeout;
        self
    }

    /// Set the read bound of one consume cycle.
    pub fn with_consume_timeout(mut self, timeout: Duration) -> Self {
        self.consume_timeout = timeout;
        self
    }

    /// Set the pause taken after a non-timeout consume error.
    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    /// Replace the publish retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Connection URL of the seed node.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    /// Reject settings no backend can work with.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be at least 1".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.backend != BackendKind::Memory && self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("redis backend requires a host".into()));
        }

        if self.backend != BackendKind::Memory && !self.keep_alive {
            return Err(Error::InvalidConfig(
                "redis backend always uses TCP keep-alive".into(),
            ));
        }

        Ok(())
    }
}
