//! Pub/sub manager over Redis with a background consumer.
//!
//! This library wraps an external pub/sub backend (a Redis cluster, a single
//! Redis server, or an in-process hub) and adds the parts a long-running
//! service needs around it: a publish path with bounded retries and backoff,
//! a background consumer that dispatches incoming messages to one handler,
//! clean start/stop of that consumer, and serialized access to the shared
//! subscription handle.
//!
//! Errors never escape the manager: failures are logged and degrade to
//! no-ops. See [`PubSubManager`] for the entry point.

// Import all sub modules once...
mod backend;
mod consumer;
mod domain;
mod manager;

mod pubsub_config;
mod retry;

mod error;
mod macros;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use manager::{PubSubManager, PublishOutcome};

pub use pubsub_config::{BackendKind, PubSubConfig};
pub use retry::{BackoffStrategy, RetryConfig};

pub use error::{Error, Result};

pub use backend::{create_memory_client, create_memory_client_with_hub, create_redis_client, MemoryHub};

// --- public re-exports
pub use domain::{
    //
    MessageCallback,
    PubSubClient,
    PubSubClientPtr,
    Subscriber,
};

/// Connect to the backend selected by `config.backend`.
///
/// # Errors
///
/// - [`Error::InvalidConfig`] if `config` fails validation, or a redis
///   backend is requested without the `backend_redis` feature
/// - [`Error::Connection`] if the backend cannot be reached in time
pub async fn connect(config: &PubSubConfig) -> Result<PubSubClientPtr> {
    // ---
    config.validate()?;

    match config.backend {
        BackendKind::Memory => Ok(create_memory_client(config)),
        BackendKind::Standalone | BackendKind::Cluster => create_redis_client(config).await,
    }
}
