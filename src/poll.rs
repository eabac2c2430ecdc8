//! Fixed-interval polling with an explicit stop handle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shared view of a poller's stop flag, handed to every run.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn stopped() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

/// Owner of a running poll loop. Dropping the handle stops the loop.
pub struct PollHandle {
    name: &'static str,
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Stop the loop and abort any run still in flight. Idempotent.
    ///
    /// Once this returns no new run is started.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            info!(poller = self.name, "poller stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `job` now and then every `period`.
///
/// Each run gets its own task, so a slow run never delays the next tick and
/// runs may overlap. Consumers that care about ordering (the ticker cache)
/// resolve it themselves.
///
/// On a multi-thread runtime a run being polled on another worker when
/// `stop()` returns keeps going until its next await point, where the abort
/// lands. Jobs must therefore check the `StopSignal` right before any remote
/// call and again before publishing a result.
pub fn spawn<F, Fut>(name: &'static str, period: Duration, job: F) -> PollHandle
where
    F: Fn(StopSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();

    info!(poller = name, period_ms = period.as_millis() as u64, "poller started");
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Dropping the set (when this task is aborted) aborts in-flight runs.
        let mut runs = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let gate = flag.clone();
                    let run = job(StopSignal(flag.clone()));
                    runs.spawn(async move {
                        if gate.load(Ordering::SeqCst) {
                            return;
                        }
                        run.await;
                    });
                }
                Some(done) = runs.join_next(), if !runs.is_empty() => {
                    match done {
                        Ok(()) => {}
                        Err(e) if e.is_panic() => warn!(poller = name, error = %e, "poll run panicked"),
                        Err(_) => debug!(poller = name, "poll run cancelled"),
                    }
                }
            }
        }
    });

    PollHandle {
        name,
        stopped,
        task: Some(task),
    }
}
