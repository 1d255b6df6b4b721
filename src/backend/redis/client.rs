//! Redis pub/sub backend implementation using `redis`.
//!
//! ## Two kinds of connection
//!
//! Redis mandates a dedicated connection for pub/sub: a connection in
//! subscriber mode cannot issue `PUBLISH`. The backend therefore keeps:
//!
//! - a small pool of publish connections (`pool_size` of them), multiplexed
//!   connections for a standalone server or cluster connections for a cluster,
//! - one pub/sub connection per [`Subscriber`], split into a sink (used for
//!   `SUBSCRIBE` / `UNSUBSCRIBE`) and a stream (polled by `consume`).
//!
//! Classic pub/sub messages are broadcast to every node of a cluster, so the
//! subscriber connects to the seed node in both modes.
//!
//! ## Pool discipline
//!
//! A semaphore with `pool_size` permits bounds concurrent publishes. Waiting
//! for a permit is limited to `pool_wait_timeout`; the publish then fails with
//! [`Error::PoolTimeout`] and the caller's retry policy decides what happens.
//!
//! ## Consume cycle
//!
//! One cycle waits at most `consume_timeout` for a message. Nothing arriving
//! is reported as [`Error::Timeout`]; a stream that ended (connection lost)
//! is a [`Error::Backend`] error. There is no reconnect.

use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;

use tokio::sync::Semaphore;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    BackendKind,
    Error,
    MessageCallback,
    PubSubClient,
    PubSubClientPtr,
    PubSubConfig,
    Result,
    Subscriber,
};

/// A publish-capable connection.
#[derive(Clone)]
enum PublishConnection {
    //
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

impl PublishConnection {
    // ---

    /// Issue `PUBLISH channel message`, returning the receiver count.
    async fn publish(&mut self, channel: &str, message: &str) -> redis::RedisResult<i64> {
        // ---
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(message);

        match self {
            PublishConnection::Standalone(conn) => cmd.query_async::<i64>(conn).await,
            PublishConnection::Cluster(conn) => cmd.query_async::<i64>(conn).await,
        }
    }
}

/// Fixed-size set of publish connections with a bounded wait for a free one.
struct ConnectionPool {
    // ---
    connections: Vec<PublishConnection>,
    next: AtomicUsize,
    permits: Semaphore,
    wait_timeout: Duration,
}

impl ConnectionPool {
    // ---

    fn new(connections: Vec<PublishConnection>, wait_timeout: Duration) -> Self {
        Self {
            permits: Semaphore::new(connections.len()),
            connections,
            next: AtomicUsize::new(0),
            wait_timeout,
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<i64> {
        // ---
        let _permit = tokio::time::timeout(self.wait_timeout, self.permits.acquire())
            .await
            .map_err(|_| Error::PoolTimeout(self.wait_timeout))?
            .map_err(|_| Error::Backend("publish connection pool closed".into()))?;

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let mut conn = self.connections[index].clone();

        conn.publish(channel, message).await.map_err(Error::from)
    }

    fn close(&self) {
        self.permits.close();
    }
}

/// Redis implementation of [`PubSubClient`].
struct RedisClient {
    // ---
    client_id: String, // for logging only
    pool: ConnectionPool,
    pubsub_client: redis::Client,
    connect_timeout: Duration,
    consume_timeout: Duration,
}

#[async_trait::async_trait]
impl PubSubClient for RedisClient {
    // ---

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        // ---
        let _receivers = self.pool.publish(channel, message).await?;
        log_debug!(
            "{}: published on {channel}, {_receivers} receiver(s)",
            self.client_id
        );
        Ok(())
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>> {
        // ---
        let pubsub = connect_within(
            self.connect_timeout,
            "pubsub connection",
            self.pubsub_client.get_async_pubsub(),
        )
        .await?;

        let (sink, stream) = pubsub.split();

        Ok(Box::new(RedisSubscriber {
            client_id: self.client_id.clone(),
            sink,
            stream,
            callback: None,
            read_timeout: self.consume_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        log_debug!("{}: closing redis client", self.client_id);
        self.pool.close();
        Ok(())
    }
}

/// Redis implementation of [`Subscriber`].
struct RedisSubscriber {
    // ---
    client_id: String, // for logging only
    sink: PubSubSink,
    stream: PubSubStream,
    callback: Option<MessageCallback>,
    read_timeout: Duration,
}

#[async_trait::async_trait]
impl Subscriber for RedisSubscriber {
    // ---

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        // ---
        self.sink.subscribe(channel).await?;
        log_debug!("{}: subscribed to {channel}", self.client_id);
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        // ---
        self.sink.unsubscribe(channel).await?;
        log_debug!("{}: unsubscribed from {channel}", self.client_id);
        Ok(())
    }

    fn on_message(&mut self, callback: MessageCallback) {
        self.callback = Some(callback);
    }

    async fn consume(&mut self) -> Result<()> {
        // ---
        let msg = match tokio::time::timeout(self.read_timeout, self.stream.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                return Err(Error::Backend(format!(
                    "{}: pubsub stream ended",
                    self.client_id
                )))
            }
            Err(_) => return Err(Error::Timeout),
        };

        let payload = decode_payload(msg.get_payload_bytes());

        if let Some(callback) = &self.callback {
            callback(msg.get_channel_name(), &payload);
        }

        Ok(())
    }
}

/// Payloads are binary-safe in Redis; invalid UTF-8 is replaced, not rejected.
fn decode_payload(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Await a connection attempt, bounded by `timeout`.
async fn connect_within<F, T>(timeout: Duration, what: &str, connecting: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    // ---
    match tokio::time::timeout(timeout, connecting).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) => Err(Error::Connection(format!("{what}: {err}"))),
        Err(_) => Err(Error::Connection(format!(
            "{what}: no answer within {timeout:?}"
        ))),
    }
}

/// Creates a Redis client from the given configuration.
///
/// The `pool_size` publish connections are opened eagerly. The pub/sub
/// connection is opened by each `subscriber()` call.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the URL cannot be parsed or any publish
/// connection cannot be established within `connect_timeout`.
pub async fn create_client(config: &PubSubConfig) -> Result<PubSubClientPtr> {
    // ---
    let url = config.redis_url();

    let pubsub_client = redis::Client::open(url.as_str()).map_err(|err| {
        let msg = format!("redis: failed to open client for {url}: {err}");
        log_error!("{}: {msg}", config.manager_id);
        Error::Connection(msg)
    })?;

    let mut connections = Vec::with_capacity(config.pool_size);

    match config.backend {
        BackendKind::Cluster => {
            let cluster = ClusterClient::new(vec![url.as_str()]).map_err(|err| {
                Error::Connection(format!("redis: invalid cluster seed {url}: {err}"))
            })?;

            for _ in 0..config.pool_size {
                let conn = connect_within(
                    config.connect_timeout,
                    "cluster publish connection",
                    cluster.get_async_connection(),
                )
                .await?;
                connections.push(PublishConnection::Cluster(conn));
            }
        }
        BackendKind::Standalone | BackendKind::Memory => {
            for _ in 0..config.pool_size {
                let conn = connect_within(
                    config.connect_timeout,
                    "publish connection",
                    pubsub_client.get_multiplexed_async_connection(),
                )
                .await?;
                connections.push(PublishConnection::Standalone(conn));
            }
        }
    }

    log_info!(
        "{}: connected to redis at {url} ({:?}, {} publish connection(s), keep-alive {})",
        config.manager_id,
        config.backend,
        connections.len(),
        config.keep_alive
    );

    Ok(Arc::new(RedisClient {
        client_id: config.manager_id.clone(),
        pool: ConnectionPool::new(connections, config.pool_wait_timeout),
        pubsub_client,
        connect_timeout: config.connect_timeout,
        consume_timeout: config.consume_timeout,
    }))
}
