//! Control surface for the surrounding application: start, stop, observe.

use crate::activity::{LogTail, SyncCounters, SyncStats};
use crate::config::StoreConfig;
use crate::error::SyncError;
use crate::orchestrator::SyncTask;
use crate::store::{ObjectStore, S3Store};
use crate::types::{SchedulerState, SyncConfig, SyncMode};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running mirror task.
///
/// Dropping the handle does not stop the task; call [`SyncHandle::stop`].
#[derive(Debug)]
pub struct SyncHandle {
    mode: SyncMode,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    counters: Arc<SyncCounters>,
    log: LogTail,
    state: watch::Receiver<SchedulerState>,
}

/// Validates `config` and spawns the cycle loop on the current Tokio runtime.
///
/// Configuration problems are returned here and the task never starts.
/// No two tasks may share a `local_root`.
///
/// # Arguments
///
/// * `store` - Provider to list and download from
/// * `config` - Bucket, prefix, root, interval and mode
///
/// # Returns
///
/// A handle for stopping and observing the task, or a configuration error.
pub fn start(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Result<SyncHandle, SyncError> {
    config.validate()?;
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        SyncError::Configuration("start must be called from within a Tokio runtime".into())
    })?;

    let mode = config.mode;
    let cancel = CancellationToken::new();
    let (task, log, state, counters) = SyncTask::new(store, config, cancel.clone());
    let task = runtime.spawn(task.run());

    Ok(SyncHandle {
        mode,
        cancel,
        task,
        counters,
        log,
        state,
    })
}

/// Connects to S3 with `store_config` and starts a task against it.
pub async fn start_s3(config: SyncConfig, store_config: &StoreConfig) -> Result<SyncHandle, SyncError> {
    config.validate()?;
    let store = S3Store::connect(store_config).await;
    start(Arc::new(store), config)
}

impl SyncHandle {
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Requests a cooperative stop. The current pass ends at the next object,
    /// metadata is persisted, and the task logs its termination line.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Cumulative counters since the task started.
    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }

    /// Pulls pending log lines into the tail and returns them.
    pub fn drain_log(&mut self) -> Vec<String> {
        self.log.drain()
    }

    /// The most recent log lines, oldest first.
    pub fn log_tail(&self) -> impl Iterator<Item = &str> {
        self.log.lines()
    }

    /// Waits until the scheduler reaches `target`.
    pub async fn wait_for_state(&mut self, target: SchedulerState) -> Result<(), SyncError> {
        self.state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::Configuration("task exited before reaching state".into()))
    }

    /// Waits for the task to exit and returns the log lines it left behind.
    pub async fn join(mut self) -> Result<Vec<String>, SyncError> {
        (&mut self.task).await.map_err(|e| {
            SyncError::IoError(std::io::Error::other(format!("Task join error: {}", e)))
        })?;
        Ok(self.log.drain())
    }
}

/// Convenience form of [`SyncHandle::stop`].
pub fn stop(handle: &SyncHandle) {
    handle.stop();
}
