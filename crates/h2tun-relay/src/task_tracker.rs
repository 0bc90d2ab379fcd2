//! Task tracking for connection and session tasks
//!
//! Every task spawned here can be waited on during shutdown and is dropped
//! (closing whatever sockets it owns) when the grace period runs out.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a drain finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task finished within the grace period
    Completed,
    /// The grace period elapsed and the remaining tasks were torn down
    Forced { remaining: usize },
}

/// Tracks background tasks so that they can be drained on shutdown
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    tasks: tokio_util::task::TaskTracker,
    teardown: CancellationToken,
}

impl TaskTracker {
    /// Create a new task tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task
    ///
    /// The task runs to completion unless a drain times out, in which case
    /// it is dropped at its next suspension point.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let teardown = self.teardown.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = task => {}
                _ = teardown.cancelled() => debug!("Tracked task torn down"),
            }
        });
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for all tasks, tearing them down once `grace` has elapsed
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.tasks.close();

        if tokio::time::timeout(grace, self.tasks.wait()).await.is_ok() {
            return DrainOutcome::Completed;
        }

        let remaining = self.tasks.len();
        warn!(
            "Shutdown grace period of {:?} elapsed, forcing {} task(s) to stop",
            grace, remaining
        );

        self.teardown.cancel();
        self.tasks.wait().await;

        DrainOutcome::Forced { remaining }
    }
}
