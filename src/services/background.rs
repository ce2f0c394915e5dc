// ABOUTME: Dispatcher for best-effort background side effects
// ABOUTME: Tasks are tracked so shutdown can wait for them, and their failures are only logged
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::errors::AppResult;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Runs side effects off the request path
///
/// Side effects and long-lived workers are tracked apart: `drain` waits for the
/// side effects spawned so far while new ones keep being accepted, and workers
/// only stop when the dispatcher shuts down.
#[derive(Debug, Clone, Default)]
pub struct BackgroundDispatcher {
    tracker: TaskTracker,
    epoch: Arc<Mutex<TaskTracker>>,
    workers: TaskTracker,
    cancel: CancellationToken,
}

impl BackgroundDispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the dispatcher shuts down
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn current_epoch(&self) -> TaskTracker {
        self.epoch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn a named best-effort task
    ///
    /// Returns `false` once shutdown started; the task is then dropped.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        if self.tracker.is_closed() {
            debug!(task = name, "Background dispatcher closed, task dropped");
            return false;
        }
        let task = self.current_epoch().track_future(async move {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Background task failed");
            }
        });
        self.tracker.spawn(task);
        true
    }

    /// Spawn a long-lived worker that runs until shutdown
    ///
    /// Workers are not waited for by `drain`; they should watch `cancellation()`.
    pub fn spawn_worker<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        if self.workers.is_closed() {
            debug!(worker = name, "Background dispatcher closed, worker dropped");
            return false;
        }
        self.workers.spawn(async move {
            if let Err(e) = task.await {
                warn!(worker = name, error = %e, "Background worker failed");
            }
        });
        true
    }

    /// Number of side-effect tasks still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every side-effect task spawned before this call
    ///
    /// Tasks spawned while draining are accepted and belong to the next drain.
    pub async fn drain(&self) {
        let finished = {
            let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *epoch)
        };
        finished.close();
        finished.wait().await;
    }

    /// Stop accepting tasks and wait up to `grace` for running ones
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        self.workers.close();
        self.cancel.cancel();
        let all = async {
            self.tracker.wait().await;
            self.workers.wait().await;
        };
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!(
                remaining = self.tracker.len() + self.workers.len(),
                "Background tasks still running after shutdown grace period"
            );
        } else {
            info!("Background tasks drained");
        }
    }
}
