// tests/common/mod.rs

//! Scripted fake backend for manager tests.
//!
//! Counts every backend call, records when publishes happened (on the tokio
//! clock, so paused-time tests see exact instants) and injects failures.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use pubsub_manager::{
    //
    Error,
    MessageCallback,
    PubSubClient,
    PubSubClientPtr,
    PubSubConfig,
    PubSubManager,
    Result,
    Subscriber,
};

/// What an idle consume cycle does after waiting `Duration`.
#[derive(Clone, Copy, Debug)]
pub enum ConsumeScript {
    /// Report a timeout, like a backend whose read bound elapsed.
    Timeout(Duration),
    /// Report a non-timeout backend error.
    Fail(Duration),
    /// Panic inside the backend.
    Panic,
}

/// Shared call log of one fake backend.
#[derive(Default)]
pub struct FakeStats {
    pub publish_calls: AtomicU32,
    pub publish_times: Mutex<Vec<Instant>>,
    pub consume_calls: AtomicU32,
    pub subscribed: Mutex<Vec<String>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub callbacks_installed: AtomicU32,
    pub inbox: Mutex<VecDeque<(String, String)>>,
}

impl FakeStats {
    pub fn publish_calls(&self) -> u32 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn consume_calls(&self) -> u32 {
        self.consume_calls.load(Ordering::SeqCst)
    }

    pub fn publish_gaps(&self) -> Vec<Duration> {
        let times = self.publish_times.lock().unwrap();
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    /// Queue a message for the next consume cycle to deliver.
    pub fn push_incoming(&self, channel: &str, payload: &str) {
        self.inbox
            .lock()
            .unwrap()
            .push_back((channel.to_string(), payload.to_string()));
    }
}

pub struct FakeClient {
    stats: Arc<FakeStats>,
    failing_publishes: u32,
    consume: ConsumeScript,
    subscriber_fails: bool,
}

impl FakeClient {
    pub fn new(consume: ConsumeScript) -> Self {
        Self {
            stats: Arc::new(FakeStats::default()),
            failing_publishes: 0,
            consume,
            subscriber_fails: false,
        }
    }

    /// The first `count` publish calls fail.
    pub fn failing_publishes(mut self, count: u32) -> Self {
        self.failing_publishes = count;
        self
    }

    /// `subscriber()` reports a connection error.
    pub fn without_subscriber(mut self) -> Self {
        self.subscriber_fails = true;
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        self.stats.clone()
    }
}

#[async_trait::async_trait]
impl PubSubClient for FakeClient {
    async fn publish(&self, _channel: &str, _message: &str) -> Result<()> {
        let call = self.stats.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.publish_times.lock().unwrap().push(Instant::now());

        if call <= self.failing_publishes {
            Err(Error::Backend(format!("injected failure #{call}")))
        } else {
            Ok(())
        }
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>> {
        if self.subscriber_fails {
            return Err(Error::Connection("injected subscriber failure".into()));
        }

        Ok(Box::new(FakeSubscriber {
            stats: self.stats.clone(),
            script: self.consume,
            callback: None,
        }))
    }
}

struct FakeSubscriber {
    stats: Arc<FakeStats>,
    script: ConsumeScript,
    callback: Option<MessageCallback>,
}

#[async_trait::async_trait]
impl Subscriber for FakeSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.stats.subscribed.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.stats.unsubscribed.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    fn on_message(&mut self, callback: MessageCallback) {
        self.stats.callbacks_installed.fetch_add(1, Ordering::SeqCst);
        self.callback = Some(callback);
    }

    async fn consume(&mut self) -> Result<()> {
        self.stats.consume_calls.fetch_add(1, Ordering::SeqCst);

        let incoming = self.stats.inbox.lock().unwrap().pop_front();
        if let Some((channel, payload)) = incoming {
            tokio::task::yield_now().await;
            if let Some(callback) = &self.callback {
                callback(&channel, &payload);
            }
            return Ok(());
        }

        match self.script {
            ConsumeScript::Timeout(wait) => {
                tokio::time::sleep(wait).await;
                Err(Error::Timeout)
            }
            ConsumeScript::Fail(wait) => {
                tokio::time::sleep(wait).await;
                Err(Error::Backend("injected consume failure".into()))
            }
            ConsumeScript::Panic => panic!("injected consume panic"),
        }
    }
}

pub fn test_config() -> PubSubConfig {
    PubSubConfig::memory("fake-test").with_consume_timeout(Duration::from_millis(100))
}

/// Build a manager around `client`, returning its call log too.
pub async fn manager_with(client: FakeClient) -> (PubSubManager, Arc<FakeStats>) {
    let stats = client.stats();
    let client: PubSubClientPtr = Arc::new(client);
    let manager = PubSubManager::from_client(test_config(), Some(client)).await;
    (manager, stats)
}
