//! Supervised task set for fire-and-forget work and scheduler loops

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Owns every background task of the process.
///
/// Panics inside a task are caught and logged with the task name instead of
/// being lost in a detached `JoinHandle`.
#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    panics: Arc<AtomicUsize>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a fire-and-forget task.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.spawn_caught(name, task);
    }

    fn spawn_caught<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let panics = Arc::clone(&self.panics);
        self.tracker.spawn(async move {
            if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
                panics.fetch_add(1, Ordering::SeqCst);
                let message = panic_message(payload.as_ref());
                error!(task = name, panic = %message, "Supervised task panicked");
            }
        })
    }

    /// Spawn a cancellable loop; the returned handle stops it and waits for it.
    pub fn spawn_loop<F, Fut>(&self, name: &'static str, body: F) -> ScheduledLoop
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = self.spawn_caught(name, body(cancel.clone()));
        ScheduledLoop {
            name,
            cancel,
            handle,
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    pub fn panic_count(&self) -> usize {
        self.panics.load(Ordering::SeqCst)
    }

    /// Wait until no task is running. Tasks may still be spawned afterwards.
    pub async fn wait_idle(&self) {
        while !self.tracker.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Stop accepting the process as "running" and wait up to `grace` for tasks.
    ///
    /// Returns false when tasks were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        info!(tasks = self.tracker.len(), "Waiting for background tasks");
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    tasks = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "Background tasks still running after grace period"
                );
                false
            }
        }
    }
}

/// A running scheduler loop.
#[derive(Debug)]
pub struct ScheduledLoop {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledLoop {
    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "Loop did not exit cleanly");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Run one scheduler cycle; a panic comes back as its message instead of
/// unwinding out of the loop that drives the cycle.
pub(crate) async fn catch_cycle<F>(name: &'static str, cycle: F) -> Result<F::Output, String>
where
    F: Future,
{
    AssertUnwindSafe(cycle).catch_unwind().await.map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(task = name, panic = %message, "Scheduler cycle panicked");
        message
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let supervisor = TaskSupervisor::new();
        let ran = Arc::new(AtomicBool::new(false));

        supervisor.spawn("boom", async { panic!("sheet exploded") });
        let flag = Arc::clone(&ran);
        supervisor.spawn("fine", async move { flag.store(true, Ordering::SeqCst) });

        supervisor.wait_idle().await;

        assert_eq!(supervisor.panic_count(), 1);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(supervisor.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_loop_stops_and_is_awaited() {
        let supervisor = TaskSupervisor::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let scheduled = supervisor.spawn_loop("ticker", move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduled.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);

        assert_eq!(after_stop, 3);
        assert_eq!(supervisor.active_tasks(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_catch_cycle_returns_panic_message() {
        let caught = catch_cycle("cycle", async { panic!("row source exploded") }).await;
        assert_eq!(caught, Err("row source exploded".to_string()));

        let fine = catch_cycle("cycle", async { 7 }).await;
        assert_eq!(fine, Ok(7));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_task() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn("stuck", std::future::pending());

        assert!(!supervisor.shutdown(Duration::from_millis(20)).await);
    }
}
