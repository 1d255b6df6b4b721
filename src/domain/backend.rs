// src/domain/backend.rs

//! Backend domain abstractions.
//!
//! The manager adds retry and lifecycle discipline on top of an external
//! pub/sub client. This module names the narrow slice of that client it
//! needs: publish, obtain a subscriber, and on the subscriber subscribe,
//! unsubscribe, install a message callback and run one consume cycle.
//!
//! Nothing here refers to a concrete protocol or library. Implementations
//! live under `src/backend/`.

use std::sync::Arc;

use crate::Result;

/// Callback invoked by a [`Subscriber`] for every delivered message.
///
/// Arguments are `(channel, payload)`.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Connection to a pub/sub backend.
///
/// A client is shared (see [`PubSubClientPtr`]) and must tolerate concurrent
/// `publish` calls; backends that cannot run them in parallel serialize
/// internally.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat the methods as
/// normal `async fn`s.
#[async_trait::async_trait]
pub trait PubSubClient: Send + Sync {
    // ---
    /// Publish `message` on `channel`.
    ///
    /// Delivery is fire-and-forget: success means the backend accepted the
    /// message, not that anybody received it.
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Create the subscription handle for this client.
    async fn subscriber(&self) -> Result<Box<dyn Subscriber>>;

    /// Release backend resources. Further calls on the client may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Subscription handle.
///
/// A subscriber is not safe for concurrent use: every method takes
/// `&mut self` and the owner is expected to serialize access.
#[async_trait::async_trait]
pub trait Subscriber: Send {
    // ---
    /// Register interest in `channel`.
    ///
    /// Repeated subscriptions to the same channel follow backend semantics.
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    /// Drop interest in `channel`.
    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    /// Install the callback used by [`consume`](Subscriber::consume),
    /// replacing any previous one.
    fn on_message(&mut self, callback: MessageCallback);

    /// Run one consume cycle.
    ///
    /// Waits a bounded time for incoming traffic and dispatches what arrived
    /// to the installed callback. Returns [`Error::Timeout`](crate::Error::Timeout)
    /// when the bound elapsed with nothing to deliver.
    async fn consume(&mut self) -> Result<()>;
}

/// Shared client pointer.
///
/// This is an `Arc<dyn PubSubClient>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connections
pub type PubSubClientPtr = Arc<dyn PubSubClient>;
