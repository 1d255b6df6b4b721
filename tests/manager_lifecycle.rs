mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use common::{manager_with, ConsumeScript, FakeClient};

fn idle_for(ms: u64) -> FakeClient {
    FakeClient::new(ConsumeScript::Timeout(Duration::from_millis(ms)))
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    // ---
    let (manager, stats) = manager_with(idle_for(100)).await;

    assert!(manager.start_consuming());
    assert!(!manager.start_consuming());
    assert!(manager.is_consuming());

    sleep(Duration::from_millis(450)).await;
    let calls = stats.consume_calls();
    assert!((4..=5).contains(&calls), "calls = {calls}");

    manager.stop_consuming().await;
    assert!(!manager.is_consuming());

    let frozen = stats.consume_calls();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(stats.consume_calls(), frozen);
}

#[tokio::test(start_paused = true)]
async fn no_consume_cycle_after_stop_returns() {
    // ---
    let (manager, stats) = manager_with(idle_for(30)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(200)).await;
    manager.stop_consuming().await;

    let frozen = stats.consume_calls();
    assert!(frozen > 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(stats.consume_calls(), frozen);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_at_most_one_consume_timeout() {
    // ---
    let (manager, _stats) = manager_with(idle_for(100)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(50)).await;

    let stopping = Instant::now();
    manager.stop_consuming().await;
    let waited = stopping.elapsed();

    assert!(waited <= Duration::from_millis(100), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_error_pause() {
    // ---
    let (manager, stats) =
        manager_with(FakeClient::new(ConsumeScript::Fail(Duration::from_millis(10)))).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(stats.consume_calls(), 1);

    let stopping = Instant::now();
    manager.stop_consuming().await;

    assert!(stopping.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn timeouts_do_not_trigger_the_error_pause() {
    // ---
    let (manager, stats) = manager_with(idle_for(10)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(1000)).await;
    manager.stop_consuming().await;

    let calls = stats.consume_calls();
    assert!(calls >= 90, "calls = {calls}");
}

#[tokio::test(start_paused = true)]
async fn errors_pause_before_the_next_cycle() {
    // ---
    let (manager, stats) =
        manager_with(FakeClient::new(ConsumeScript::Fail(Duration::ZERO))).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(100)).await;
    assert!(stats.consume_calls() <= 2);

    // Cycles at 0ms, ~500ms and ~1000ms.
    sleep(Duration::from_millis(1100)).await;
    manager.stop_consuming().await;

    let calls = stats.consume_calls();
    assert!((2..=4).contains(&calls), "calls = {calls}");
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop() {
    // ---
    let (manager, stats) = manager_with(idle_for(20)).await;

    manager.stop_consuming().await;
    assert!(!manager.is_consuming());

    assert!(manager.start_consuming());
    manager.stop_consuming().await;
    manager.stop_consuming().await;

    let before = stats.consume_calls();
    assert!(manager.start_consuming());
    sleep(Duration::from_millis(200)).await;
    manager.stop_consuming().await;

    assert!(stats.consume_calls() > before);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_manager_stops_the_consumer() {
    // ---
    let (manager, stats) = manager_with(idle_for(20)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(100)).await;
    drop(manager);

    // Let the runtime process the abort.
    tokio::task::yield_now().await;
    let frozen = stats.consume_calls();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(stats.consume_calls(), frozen);
}

#[tokio::test(start_paused = true)]
async fn handler_receives_messages_in_order() {
    // ---
    let (manager, stats) = manager_with(idle_for(100)).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    manager
        .register_message_handler(move |channel, payload| {
            sink.lock().unwrap().push(format!("{channel}/{payload}"));
        })
        .await;
    manager.subscribe("jobs").await;

    stats.push_incoming("jobs", "1");
    stats.push_incoming("jobs", "2");
    stats.push_incoming("jobs", "3");

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(150)).await;
    manager.stop_consuming().await;

    assert_eq!(*seen.lock().unwrap(), vec!["jobs/1", "jobs/2", "jobs/3"]);
    assert_eq!(*stats.subscribed.lock().unwrap(), vec!["jobs".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn subscribe_waits_for_the_running_cycle() {
    // ---
    let (manager, stats) = manager_with(idle_for(100)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(10)).await;

    // The loop holds the subscription handle until its cycle times out.
    let started = Instant::now();
    manager.subscribe("late").await;
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(80), "{waited:?}");
    assert!(waited <= Duration::from_millis(100), "{waited:?}");
    assert_eq!(*stats.subscribed.lock().unwrap(), vec!["late".to_string()]);

    manager.unsubscribe("late").await;
    assert_eq!(*stats.unsubscribed.lock().unwrap(), vec!["late".to_string()]);

    manager.stop_consuming().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_and_disconnects() {
    // ---
    let (manager, stats) = manager_with(idle_for(50)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(120)).await;
    manager.shutdown().await;

    assert!(!manager.is_consuming());
    assert!(!manager.is_connected());

    let frozen = stats.consume_calls();
    manager.subscribe("ignored").await;
    assert!(manager.start_consuming());
    sleep(Duration::from_millis(300)).await;
    manager.stop_consuming().await;

    assert_eq!(stats.consume_calls(), frozen);
    assert!(stats.subscribed.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_stop_the_consumer() {
    // ---
    let (manager, stats) = manager_with(idle_for(50)).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    manager
        .register_message_handler(move |_channel, payload| {
            if payload == "boom" {
                panic!("handler rejected {payload}");
            }
            sink.lock().unwrap().push(payload.to_string());
        })
        .await;
    manager.subscribe("jobs").await;

    stats.push_incoming("jobs", "boom");
    stats.push_incoming("jobs", "after");
    assert!(manager.start_consuming());

    sleep(Duration::from_millis(200)).await;
    assert!(manager.is_consuming());
    assert_eq!(*seen.lock().unwrap(), vec!["after".to_string()]);

    let before = stats.consume_calls();
    sleep(Duration::from_secs(1)).await;
    assert!(stats.consume_calls() > before);

    manager.stop_consuming().await;
    assert!(manager.start_consuming());
    manager.stop_consuming().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_backend_clears_the_running_flag() {
    // ---
    let (manager, stats) = manager_with(FakeClient::new(ConsumeScript::Panic)).await;

    assert!(manager.start_consuming());
    sleep(Duration::from_millis(50)).await;

    assert_eq!(stats.consume_calls(), 1);
    assert!(!manager.is_consuming());

    // The dead loop does not block a restart.
    assert!(manager.start_consuming());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(stats.consume_calls(), 2);

    manager.stop_consuming().await;
    assert!(!manager.is_consuming());
}
