//! In-memory backend implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`PubSubClient`] and [`Subscriber`] traits. It is intended for tests, local
//! execution, and as the reference for backend semantics.
//!
//! ## Reference Semantics
//!
//! - A subscription matches a channel only on exact string equality.
//! - Subscribing twice to the same channel is the same as subscribing once.
//! - Once `subscribe()` returns, messages published afterwards on that channel
//!   are delivered to the subscriber; earlier ones are not (fire-and-forget).
//! - `publish` never blocks on subscribers and reports how many received it.
//!
//! ## Non-Goals
//!
//! This backend does not emulate broker failure modes or persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    MessageCallback,
    PubSubClient,
    PubSubClientPtr,
    PubSubConfig,
    Result,
    Subscriber,
};

type SubscriberId = u64;
type Inbox = mpsc::UnboundedSender<Delivery>;

struct Delivery {
    channel: String,
    payload: String,
}

/// Shared message bus for the in-memory backend.
///
/// Simulates a broker within a single process. Every client created on the
/// same hub sees the others' messages, exactly as clients connected to one
/// Redis deployment would.
///
/// # Usage in Integration Tests
///
/// Construct a hub per test and pass it to [`create_memory_client_with_hub`]
/// to keep parallel tests apart:
///
/// ```
/// # use pubsub_manager::{MemoryHub, PubSubConfig};
/// # async fn example() -> pubsub_manager::Result<()> {
/// let hub = MemoryHub::new();
///
/// let a = pubsub_manager::create_memory_client_with_hub(&PubSubConfig::memory("a"), hub.clone());
/// let b = pubsub_manager::create_memory_client_with_hub(&PubSubConfig::memory("b"), hub.clone());
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    channels: RwLock<HashMap<String, Vec<(SubscriberId, Inbox)>>>,
    next_id: AtomicU64,
}

fn read_ignore_poison<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_ignore_poison<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    /// Deliver `payload` to every subscriber of `channel`.
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// handle was dropped are pruned on the way.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        // ---
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let channels = read_ignore_poison(&self.channels);
            if let Some(inboxes) = channels.get(channel) {
                for (id, inbox) in inboxes {
                    let delivery = Delivery {
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    };
                    match inbox.send(delivery) {
                        Ok(()) => delivered += 1,
                        Err(_) => closed.push(*id),
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut channels = write_ignore_poison(&self.channels);
            if let Some(inboxes) = channels.get_mut(channel) {
                inboxes.retain(|(id, _)| !closed.contains(id));
            }
        }

        delivered
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        read_ignore_poison(&self.channels)
            .get(channel)
            .map_or(0, Vec::len)
    }

    fn register(&self) -> SubscriberId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn subscribe(&self, id: SubscriberId, channel: &str, inbox: &Inbox) {
        // ---
        let mut channels = write_ignore_poison(&self.channels);
        let inboxes = channels.entry(channel.to_string()).or_default();

        if !inboxes.iter().any(|(existing, _)| *existing == id) {
            inboxes.push((id, inbox.clone()));
        }
    }

    fn unsubscribe(&self, id: SubscriberId, channel: &str) {
        // ---
        let mut channels = write_ignore_poison(&self.channels);
        if let Some(inboxes) = channels.get_mut(channel) {
            inboxes.retain(|(existing, _)| *existing != id);
            if inboxes.is_empty() {
                channels.remove(channel);
            }
        }
    }

    fn forget(&self, id: SubscriberId) {
        // ---
        let mut channels = write_ignore_poison(&self.channels);
        channels.retain(|_, inboxes| {
            inboxes.retain(|(existing, _)| *existing != id);
            !inboxes.is_empty()
        });
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used by [`create_memory_client`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory client.
struct MemoryClient {
    // ---
    client_id: String,
    hub: Arc<MemoryHub>,
    read_timeout: Duration,
}

#[async_trait::async_trait]
impl PubSubClient for MemoryClient {
    // ---
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let _receivers = self.hub.publish(channel, message);
        log_debug!(
            "{}: published on {channel} to {_receivers} subscriber(s)",
            self.client_id
        );
        Ok(())
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>> {
        // ---
        let (inbox, deliveries) = mpsc::unbounded_channel();

        Ok(Box::new(MemorySubscriber {
            id: self.hub.register(),
            client_id: self.client_id.clone(),
            hub: Arc::clone(&self.hub),
            inbox,
            deliveries,
            callback: None,
            read_timeout: self.read_timeout,
        }))
    }
}

/// Subscription handle on a [`MemoryHub`].
struct MemorySubscriber {
    // ---
    id: SubscriberId,
    client_id: String,
    hub: Arc<MemoryHub>,
    inbox: Inbox,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    callback: Option<MessageCallback>,
    read_timeout: Duration,
}

#[async_trait::async_trait]
impl Subscriber for MemorySubscriber {
    // ---
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        log_debug!("{}: subscribe to {channel}", self.client_id);
        self.hub.subscribe(self.id, channel, &self.inbox);
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        log_debug!("{}: unsubscribe from {channel}", self.client_id);
        self.hub.unsubscribe(self.id, channel);
        Ok(())
    }

    fn on_message(&mut self, callback: MessageCallback) {
        self.callback = Some(callback);
    }

    /// Wait up to the read timeout for one delivery and dispatch it.
    ///
    /// Deliveries that arrive while no callback is installed are consumed
    /// and dropped.
    async fn consume(&mut self) -> Result<()> {
        // ---
        let delivery = match tokio::time::timeout(self.read_timeout, self.deliveries.recv()).await
        {
            Ok(Some(delivery)) => delivery,
            // The subscriber keeps its own sender alive, so the channel
            // cannot close underneath it; treat it like an idle cycle.
            Ok(None) | Err(_) => return Err(crate::Error::Timeout),
        };

        if let Some(callback) = &self.callback {
            callback(&delivery.channel, &delivery.payload);
        }

        Ok(())
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.hub.forget(self.id);
    }
}

/// Create a new in-memory client on the process-global hub.
///
/// All clients created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_client_with_hub`].
pub fn create_memory_client(config: &PubSubConfig) -> PubSubClientPtr {
    // ---
    create_memory_client_with_hub(config, global_hub())
}

/// Create a new in-memory client on the provided hub.
pub fn create_memory_client_with_hub(config: &PubSubConfig, hub: Arc<MemoryHub>) -> PubSubClientPtr {
    // ---
    log_debug!("{}: create memory client", config.manager_id);

    Arc::new(MemoryClient {
        client_id: config.manager_id.clone(),
        hub,
        read_timeout: config.consume_timeout,
    })
}
