//! Cancellable background tasks.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a task spawned with [`spawn_periodic`], [`spawn_periodic_blocking`]
/// or [`spawn_cancellable`].
///
/// [`TaskHandle::stop`] cancels the task and waits for it to exit, so no
/// tick runs after it returns.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            warn!(task = self.name, "background task ended abnormally: {e}");
        }
        debug!(task = self.name, "background task stopped");
    }
}

/// Runs `tick` every `period`; the first tick fires immediately.
///
/// A tick in progress is allowed to finish before cancellation is observed.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() + Send + 'static,
{
    spawn_cancellable(name, move |token| async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => tick(),
            }
        }
    })
}

/// Like [`spawn_periodic`], but each tick runs on the blocking pool so heavy
/// synchronous work never holds a runtime worker.
pub fn spawn_periodic_blocking<F>(name: &'static str, period: Duration, tick: F) -> TaskHandle
where
    F: FnMut() + Send + 'static,
{
    let tick = Arc::new(Mutex::new(tick));
    spawn_cancellable(name, move |token| async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let tick = Arc::clone(&tick);
                    let run = tokio::task::spawn_blocking(move || {
                        let mut f = tick.lock().unwrap_or_else(PoisonError::into_inner);
                        f();
                    });
                    if let Err(e) = run.await {
                        warn!(task = name, "blocking tick failed: {e}");
                    }
                }
            }
        }
    })
}

/// Spawns `body` with a token that [`TaskHandle::stop`] cancels.
pub fn spawn_cancellable<F, Fut>(name: &'static str, body: F) -> TaskHandle
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let join = tokio::spawn(body(token.clone()));
    TaskHandle { name, token, join }
}
