use tiller_integration::channel::{Tx, UnboundedTx};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dispatch::WorkerJob;
use crate::error::TillerError;
use crate::lifecycle::machine::TaskService;

/// Provides a [`SystemBuilder`](builder::SystemBuilder) for constructing a running Tiller
/// system.
pub mod builder;

/// Initialised and running Tiller system: the control-plane [`TaskService`] plus the worker
/// pool handles.
#[allow(missing_debug_implementations)]
pub struct System {
    /// Control-plane facade; the HTTP layer maps verbs onto it one-to-one.
    pub tasks: TaskService,
    jobs_tx: UnboundedTx<WorkerJob>,
    workers: Vec<JoinHandle<()>>,
}

impl System {
    pub(crate) fn new(
        tasks: TaskService,
        jobs_tx: UnboundedTx<WorkerJob>,
        workers: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            tasks,
            jobs_tx,
            workers,
        }
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Shut the worker pool down gracefully: workers finish their current job, then exit.
    pub async fn shutdown(self) -> Result<(), TillerError> {
        for _ in 0..self.workers.len() {
            if self.jobs_tx.send(WorkerJob::Shutdown).is_err() {
                warn!("worker pool queue already closed during shutdown");
                break;
            }
        }

        for handle in self.workers {
            handle
                .await
                .map_err(|err| TillerError::execution(format!("worker join failed: {err}")))?;
        }
        Ok(())
    }
}
