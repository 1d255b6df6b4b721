//! Pub/sub manager.
//!
//! [`PubSubManager`] owns one backend client and the subscription handle
//! derived from it, forwards publish / subscribe / unsubscribe calls to the
//! backend, and drives a background consumer that dispatches incoming
//! messages to a single registered handler.
//!
//! ## Shared state
//!
//! - The subscription handle lives behind one async mutex (the session).
//!   Subscribe, unsubscribe, handler registration and every consume cycle of
//!   the background loop take it, so exactly one party uses the handle at a
//!   time.
//! - The client is written once at construction and cleared at shutdown.
//!   Publish clones the pointer out of a short read lock and talks to the
//!   backend without holding the session, so publishing never waits for a
//!   consume cycle and a message handler may publish.
//! - The handler sits in an atomically swappable slot; a dispatch loads it
//!   once and calls that handler, old or new, never a mix.
//! - The running flag is an atomic read by the loop on every iteration
//!   without taking any lock.
//!
//! ## Degraded mode
//!
//! If the backend cannot be reached at construction the manager still comes
//! up, with no client. Every operation then logs and returns without touching
//! a backend.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use arc_swap::ArcSwapOption;

use crate::consumer::ConsumerTask;
use crate::retry::retry_with_backoff;
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    MessageCallback,
    PubSubClientPtr,
    PubSubConfig,
    Subscriber,
};

/// Result of [`PubSubManager::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The backend accepted the message.
    Published,

    /// Every attempt failed; details were logged.
    Failed,

    /// There is no backend connection; nothing was attempted.
    Disconnected,
}

/// The user-registered message handler.
struct MessageHandler {
    func: Box<dyn Fn(&str, &str) + Send + Sync>,
}

/// State serialized by the session lock.
pub(crate) struct Session {
    pub(crate) subscriber: Option<Box<dyn Subscriber>>,
}

/// State shared between the manager handle and its consumer task.
pub(crate) struct Shared {
    // ---
    pub(crate) manager_id: String,
    pub(crate) config: PubSubConfig,
    pub(crate) session: tokio::sync::Mutex<Session>,
    pub(crate) running: AtomicBool,
    client: RwLock<Option<PubSubClientPtr>>,
    handler: Arc<ArcSwapOption<MessageHandler>>,
    pub(crate) consumer: Mutex<Option<ConsumerTask>>,
}

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    // ---
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Publish/subscribe manager with a background consumer.
///
/// Construct one per process at the composition root and share it by
/// reference (or in an `Arc`) with whoever needs to publish or subscribe.
///
/// # Example
///
/// ```no_run
/// use pubsub_manager::{PubSubConfig, PubSubManager};
///
/// # async fn example() {
/// let manager = PubSubManager::new(PubSubConfig::cluster("127.0.0.1", 6379)).await;
///
/// manager
///     .register_message_handler(|channel, payload| println!("{channel}: {payload}"))
///     .await;
/// manager.subscribe("events").await;
/// manager.start_consuming();
///
/// manager.publish("events", "hello").await;
///
/// manager.shutdown().await;
/// # }
/// ```
pub struct PubSubManager {
    shared: Arc<Shared>,
}

impl PubSubManager {
    // ---

    /// Connect to the configured backend and build the manager.
    ///
    /// A connection failure is logged and leaves the manager without a
    /// backend; it does not fail construction and is not retried.
    pub async fn new(config: PubSubConfig) -> Self {
        // ---
        let client = match crate::connect(&config).await {
            Ok(client) => Some(client),
            Err(err) => {
                log_error!(
                    "{}: pub/sub backend connection failed: {err}",
                    config.manager_id
                );
                None
            }
        };

        Self::from_client(config, client).await
    }

    /// Build the manager around an already connected client, or none.
    ///
    /// The subscription handle is derived from `client` here; if that fails
    /// the manager keeps the client for publishing and treats subscription
    /// operations as no-ops.
    pub async fn from_client(config: PubSubConfig, client: Option<PubSubClientPtr>) -> Self {
        // ---
        let manager_id = config.manager_id.clone();

        let subscriber = match &client {
            Some(client) => match client.subscriber().await {
                Ok(subscriber) => Some(subscriber),
                Err(err) => {
                    log_error!("{manager_id}: failed to create subscriber: {err}");
                    None
                }
            },
            None => None,
        };

        log_debug!(
            "{manager_id}: manager ready (client: {}, subscriber: {})",
            client.is_some(),
            subscriber.is_some()
        );

        Self {
            shared: Arc::new(Shared {
                manager_id,
                config,
                session: tokio::sync::Mutex::new(Session { subscriber }),
                running: AtomicBool::new(false),
                client: RwLock::new(client),
                handler: Arc::new(ArcSwapOption::empty()),
                consumer: Mutex::new(None),
            }),
        }
    }

    /// True while a backend client is held.
    pub fn is_connected(&self) -> bool {
        self.client().is_some()
    }

    /// True between `start_consuming` and `stop_consuming`.
    pub fn is_consuming(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn client(&self) -> Option<PubSubClientPtr> {
        // ---
        match self.shared.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Publish `message` on `channel`, retrying per the configured policy.
    ///
    /// Each failed attempt is logged and followed by the policy's backoff
    /// (100ms, 200ms with the default); no sleep follows the last attempt.
    /// Failure is reported only through logs and the returned outcome.
    ///
    /// Publishing does not take the subscription-handle lock, so it never
    /// waits for a consume cycle and can be called from a message handler.
    pub async fn publish(&self, channel: &str, message: &str) -> PublishOutcome {
        // ---
        let manager_id = self.shared.manager_id.as_str();

        let Some(client) = self.client() else {
            log_warn!("{manager_id}: no backend connection, publish to {channel} skipped");
            return PublishOutcome::Disconnected;
        };

        let retry = &self.shared.config.retry;
        let result = retry_with_backoff(retry, manager_id, "publish", |_attempt| {
            client.publish(channel, message)
        })
        .await;

        match result {
            Ok(()) => PublishOutcome::Published,
            Err(err) => {
                log_error!("{manager_id}: failed to publish to {channel}: {err}");
                PublishOutcome::Failed
            }
        }
    }

    /// Register interest in `channel`. No-op without a subscription handle.
    pub async fn subscribe(&self, channel: &str) {
        // ---
        let manager_id = self.shared.manager_id.as_str();
        let mut session = self.shared.session.lock().await;

        let Some(subscriber) = session.subscriber.as_mut() else {
            log_debug!("{manager_id}: no subscriber, subscribe to {channel} skipped");
            return;
        };

        if let Err(err) = subscriber.subscribe(channel).await {
            log_error!("{manager_id}: failed to subscribe to {channel}: {err}");
        }
    }

    /// Drop interest in `channel`. No-op without a subscription handle.
    pub async fn unsubscribe(&self, channel: &str) {
        // ---
        let manager_id = self.shared.manager_id.as_str();
        let mut session = self.shared.session.lock().await;

        let Some(subscriber) = session.subscriber.as_mut() else {
            log_debug!("{manager_id}: no subscriber, unsubscribe from {channel} skipped");
            return;
        };

        if let Err(err) = subscriber.unsubscribe(channel).await {
            log_error!("{manager_id}: failed to unsubscribe from {channel}: {err}");
        }
    }

    /// Replace the message handler.
    ///
    /// The handler is called on the consumer task with `(channel, payload)`
    /// for every delivered message. It runs while the subscription handle is
    /// held: it may call [`publish`](Self::publish), but calling `subscribe`,
    /// `unsubscribe` or `register_message_handler` on the same manager from
    /// inside it would wait on itself. A panic in the handler is caught and
    /// logged; the consumer carries on with the next message.
    pub async fn register_message_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        // ---
        let mut session = self.shared.session.lock().await;

        self.shared.handler.store(Some(Arc::new(MessageHandler {
            func: Box::new(handler),
        })));

        if let Some(subscriber) = session.subscriber.as_mut() {
            let slot = Arc::clone(&self.shared.handler);
            let manager_id = self.shared.manager_id.clone();
            let trampoline: MessageCallback = Arc::new(move |channel: &str, payload: &str| {
                let Some(handler) = slot.load_full() else {
                    return;
                };
                let dispatch =
                    panic::catch_unwind(AssertUnwindSafe(|| (handler.func)(channel, payload)));
                if let Err(payload) = dispatch {
                    log_error!(
                        "{manager_id}: message handler panicked on {channel}: {}",
                        panic_message(payload.as_ref())
                    );
                }
            });
            subscriber.on_message(trampoline);
        }

        log_debug!("{}: message handler replaced", self.shared.manager_id);
    }

    /// Start the background consumer.
    ///
    /// Returns `false` if it is already running or no tokio runtime is
    /// available; a second call while running does nothing.
    pub fn start_consuming(&self) -> bool {
        // ---
        let manager_id = self.shared.manager_id.as_str();
        let mut consumer = lock_ignore_poison(&self.shared.consumer);

        if self.shared.running.load(Ordering::Acquire) {
            log_debug!("{manager_id}: consumer already running");
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_err) => {
                log_error!("{manager_id}: cannot start consumer outside a tokio runtime: {_err}");
                return false;
            }
        };

        self.shared.running.store(true, Ordering::Release);
        *consumer = Some(ConsumerTask::spawn(&runtime, Arc::clone(&self.shared)));

        true
    }

    /// Stop the background consumer and wait for it to finish.
    ///
    /// A consume cycle in progress is not interrupted, so this can take up to
    /// one `consume_timeout`. Calling it while stopped does nothing.
    pub async fn stop_consuming(&self) {
        // ---
        let task = {
            let mut consumer = lock_ignore_poison(&self.shared.consumer);
            self.shared.running.store(false, Ordering::Release);
            let task = consumer.take();
            if let Some(task) = &task {
                task.cancel();
            }
            task
        };

        let Some(task) = task else {
            return;
        };

        if let Err(_err) = task.join().await {
            log_error!(
                "{}: consumer task ended abnormally: {_err}",
                self.shared.manager_id
            );
        }
    }

    /// Stop consuming, then release the subscription handle and the client.
    ///
    /// The consumer is fully stopped before the handle is dropped. Afterwards
    /// the manager behaves as if it never connected.
    pub async fn shutdown(&self) {
        // ---
        self.stop_consuming().await;

        let subscriber = self.shared.session.lock().await.subscriber.take();
        drop(subscriber);

        let client = match self.shared.client.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(client) = client {
            if let Err(_err) = client.close().await {
                log_warn!("{}: error closing backend client: {_err}", self.shared.manager_id);
            }
        }

        log_info!("{}: pub/sub manager shut down", self.shared.manager_id);
    }
}

impl Drop for PubSubManager {
    /// Make sure no consumer outlives the manager.
    ///
    /// `Drop` cannot wait, so the task is cancelled and aborted instead of
    /// joined; call [`shutdown`](PubSubManager::shutdown) for an orderly stop.
    fn drop(&mut self) {
        // ---
        let task = {
            let mut consumer = lock_ignore_poison(&self.shared.consumer);
            self.shared.running.store(false, Ordering::Release);
            let task = consumer.take();
            if let Some(task) = &task {
                task.cancel();
            }
            task
        };

        if let Some(task) = task {
            task.abort();
        }
    }
}
