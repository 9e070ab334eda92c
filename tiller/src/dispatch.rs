use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tiller_integration::channel::{Tx, UnboundedTx};
use tracing::info;

use crate::error::TillerError;
use crate::lifecycle::execution::LogLevel;
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::{AccountId, ExecutionId, TaskRef};

/// Unit of work handed to the worker pool.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WorkerJob {
    /// Drive one execution of a task. Workers use the supplied execution when present and
    /// allocate a fresh one when the enqueue raced past creation.
    Run {
        task: TaskRef,
        execution_id: Option<ExecutionId>,
    },
    /// Close all open positions of a task's account (follow-up of a `graceful_close` stop).
    ClosePositions { task: TaskRef, account_id: AccountId },
    /// Pool shutdown marker; one per worker.
    Shutdown,
}

/// Thin enqueue front-end: allocates the execution, seeds its log, and hands the job to the
/// worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn LifecycleStore>,
    jobs: UnboundedTx<WorkerJob>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn LifecycleStore>, jobs: UnboundedTx<WorkerJob>) -> Self {
        Self { store, jobs }
    }

    /// Allocate the next execution for `task` and enqueue it. Returns the execution id the
    /// worker will drive.
    pub fn enqueue_run(&self, task: TaskRef) -> Result<ExecutionId, TillerError> {
        let execution = self.store.allocate_execution(task, Utc::now())?;
        self.store
            .append_execution_log(execution.id, LogLevel::Info, "Execution queued", Utc::now())?;

        self.jobs
            .send(WorkerJob::Run {
                task,
                execution_id: Some(execution.id),
            })
            .map_err(|_| TillerError::execution("worker pool is not running"))?;

        info!(
            task = %task,
            execution_id = %execution.id,
            execution_number = execution.execution_number,
            "execution queued"
        );
        Ok(execution.id)
    }

    pub fn enqueue_close_positions(
        &self,
        task: TaskRef,
        account_id: AccountId,
    ) -> Result<(), TillerError> {
        self.jobs
            .send(WorkerJob::ClosePositions { task, account_id })
            .map_err(|_| TillerError::execution("worker pool is not running"))
    }
}
