//! Cross-thread task submission
//!
//! The broker transport runs on a plain OS thread while all application
//! logic lives on the async scheduler. This module carries work across that
//! boundary: a [`TaskBridge`] can be cloned onto any thread and used to
//! submit futures, and the [`BridgeWorker`] on the scheduler side spawns
//! each submitted future as its own task.
//!
//! Tasks start in submission order; once started they interleave freely.
//! The channel is unbounded, so submission never blocks the transport
//! thread. On shutdown the worker stops accepting, drops whatever never
//! started, and waits a bounded grace period for in-flight tasks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

type BridgeTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors raised when handing a task to the scheduler
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge worker is no longer accepting tasks")]
    Closed,
}

/// Thread-safe submission handle
#[derive(Clone)]
pub struct TaskBridge {
    tx: mpsc::UnboundedSender<BridgeTask>,
}

impl TaskBridge {
    /// Queues a future for execution on the scheduler
    ///
    /// Returns immediately; the future starts once the worker receives it.
    pub fn submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(task))
            .map_err(|_| BridgeError::Closed)
    }
}

/// Scheduler-side end of the bridge
pub struct BridgeWorker {
    rx: mpsc::UnboundedReceiver<BridgeTask>,
    tracker: TaskTracker,
    grace: Duration,
}

/// Creates a connected bridge pair
///
/// `grace` bounds how long the worker waits for in-flight tasks during
/// shutdown.
pub fn channel(grace: Duration) -> (TaskBridge, BridgeWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TaskBridge { tx },
        BridgeWorker {
            rx,
            tracker: TaskTracker::new(),
            grace,
        },
    )
}

impl BridgeWorker {
    /// Receives submitted tasks and spawns each as its own scheduler task
    ///
    /// Runs until `shutdown` fires or every submission handle is dropped,
    /// then drains in-flight tasks within the grace period.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Task bridge worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Task bridge worker stopping");
                    break;
                }
                task = self.rx.recv() => {
                    match task {
                        Some(task) => {
                            let _ = self.tracker.spawn(task);
                        }
                        None => {
                            debug!("All task bridge handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        // Tasks still queued at this point never started; count and drop them.
        self.rx.close();
        let mut unstarted: usize = 0;
        while self.rx.try_recv().is_ok() {
            unstarted += 1;
        }
        if unstarted > 0 {
            warn!("Dropping {} queued tasks that never started", unstarted);
        }

        self.tracker.close();
        match tokio::time::timeout(self.grace, self.tracker.wait()).await {
            Ok(()) => debug!("All in-flight tasks drained"),
            Err(_) => warn!(
                "Gave up waiting for {} in-flight tasks after {:?}",
                self.tracker.len(),
                self.grace
            ),
        }
    }
}
