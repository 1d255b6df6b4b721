//! Background consumption loop.
//!
//! The loop is the single long-running user of the subscription handle. Each
//! iteration:
//!
//! 1. checks the running flag and the task's cancellation token,
//! 2. takes the session lock and runs one consume cycle on the subscriber,
//! 3. releases the lock and classifies the result.
//!
//! ## Error policy
//!
//! - timeout: expected when nothing arrived; loop again immediately
//! - any other error: logged, then a pause of `error_pause` before retrying
//! - no subscriber at all: wait one `consume_timeout` and check again
//!
//! Errors never end the loop; only a stop request does.
//!
//! ## Cancellation
//!
//! Stopping is cooperative. The flag and token are looked at between cycles,
//! so a cycle in progress runs to its own timeout. Pauses, on the other hand,
//! end as soon as the token is cancelled.
//!
//! If a cycle panics the task ends, and the running flag is cleared on the
//! way out so the consumer can be started again. A task that was already
//! stopped leaves the flag alone; it may belong to its successor by then.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::manager::{lock_ignore_poison, Shared};
use crate::{log_debug, log_error};

/// A running consumer loop.
pub(crate) struct ConsumerTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ConsumerTask {
    // ---

    /// Spawn the loop on `runtime`.
    pub(crate) fn spawn(runtime: &Handle, shared: Arc<Shared>) -> Self {
        // ---
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(consume_loop(shared, cancel.clone()));

        Self { handle, cancel }
    }

    /// Ask the loop to exit after its current cycle.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to exit.
    pub(crate) async fn join(self) -> Result<(), JoinError> {
        self.handle.await
    }

    /// Tear the loop down without waiting.
    pub(crate) fn abort(self) {
        self.handle.abort();
    }
}

/// Clears the running flag if the loop unwinds.
struct PanicGuard<'a> {
    shared: &'a Shared,
    cancel: &'a CancellationToken,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        // ---
        if !std::thread::panicking() {
            return;
        }

        // Stop cancels under this lock, so a live token here means no
        // successor has been started yet.
        let _consumer = lock_ignore_poison(&self.shared.consumer);
        if !self.cancel.is_cancelled() {
            log_error!("{}: consumer panicked, marking it stopped", self.shared.manager_id);
            self.shared.running.store(false, Ordering::Release);
        }
    }
}

async fn consume_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    // ---
    let _guard = PanicGuard {
        shared: &shared,
        cancel: &cancel,
    };
    log_debug!("{}: consumer started", shared.manager_id);

    while shared.running.load(Ordering::Acquire) && !cancel.is_cancelled() {
        let cycle = {
            let mut session = shared.session.lock().await;
            match session.subscriber.as_mut() {
                Some(subscriber) => Some(subscriber.consume().await),
                None => None,
            }
        };

        match cycle {
            Some(Ok(())) => {}
            Some(Err(err)) if err.is_timeout() => {}
            Some(Err(err)) => {
                log_error!("{}: subscriber error: {err}", shared.manager_id);
                pause(&cancel, shared.config.error_pause).await;
            }
            None => pause(&cancel, shared.config.consume_timeout).await,
        }
    }

    log_debug!("{}: consumer stopped", shared.manager_id);
}

async fn pause(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
