use chrono::{DateTime, Utc};
use serde::Serialize;
use tiller_integration::lock::TaskLockManager;
use tracing::{info, warn};

use super::execution::{Execution, ExecutionError, LogLevel};
use super::store::LifecycleStore;
use super::{ExecutionId, ExecutionStatus, TaskId, TaskRef, TaskStatus, TaskType};
use crate::config::PlatformConfig;
use crate::error::TillerError;

/// Error recorded on executions that were queued but never picked up by a worker.
pub const STARTUP_FAILURE_MESSAGE: &str = "Execution did not start (no worker lock acquired)";

/// Tasks updated within this window are left alone: a worker may not have had time to
/// acquire its lock yet.
pub const TASK_UPDATE_GRACE_SECONDS: i64 = 30;

/// Execution details included in a status report.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub id: ExecutionId,
    pub execution_number: u32,
    pub status: ExecutionStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id,
            execution_number: execution.execution_number,
            status: execution.status,
            progress: execution.progress,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            error_message: execution.error_message.clone(),
        }
    }
}

/// Status of a task as reported to the control plane.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TaskStatusReport {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: u8,
    /// `true` when the task is `RUNNING` but its latest execution is terminal: the previous
    /// attempt just finished and the worker has not allocated the next one yet.
    pub pending_new_execution: bool,
    pub execution: Option<ExecutionSummary>,
    pub error_message: Option<String>,
}

/// Reconcile a task against worker reality, then report its status.
///
/// Invoked on every status read. Three rules converge the persisted state without worker
/// cooperation:
/// 1. a `RUNNING` task whose latest execution is terminal and whose lock is stale or absent
///    is aligned to the execution's terminal status (outside a post-update grace period);
/// 2. a `RUNNING` execution with no lock and zero progress past the startup timeout is
///    failed with [`STARTUP_FAILURE_MESSAGE`];
/// 3. a `STOPPED` task with an execution still `RUNNING` has the execution stopped and any
///    lingering lock released.
pub fn reconcile_and_report(
    store: &dyn LifecycleStore,
    locks: &dyn TaskLockManager,
    config: &PlatformConfig,
    task_ref: TaskRef,
    now: DateTime<Utc>,
) -> Result<TaskStatusReport, TillerError> {
    let mut task = store
        .task(task_ref)?
        .ok_or_else(|| TillerError::not_found(format!("task {task_ref}")))?;
    let mut latest = store.latest_execution(task_ref)?;

    let task_name = task_ref.task_type.task_name();
    let instance_key = task_ref.instance_key();
    let recently_updated = now.signed_duration_since(task.updated_at())
        < chrono::Duration::seconds(TASK_UPDATE_GRACE_SECONDS);

    // Rule 1: stale running task whose execution already finished.
    if task.status() == TaskStatus::Running
        && !recently_updated
        && let Some(execution) = &latest
        && execution.status.is_terminal()
    {
        let lock_info = locks.info(task_name, &instance_key)?;
        let is_stale = lock_info
            .as_ref()
            .map(|info| info.is_stale(now, config.stale_threshold()))
            .unwrap_or(true);

        if is_stale {
            warn!(
                task = %task_ref,
                execution_status = %execution.status,
                "stale running task detected; aligning task status to its execution"
            );
            if lock_info.is_some() {
                locks.remove(task_name, &instance_key)?;
            }
            task.set_status(execution.status.into(), now);
            store.update_task(&task)?;
        }
    }

    // Rule 2: queued execution that no worker ever started.
    if task.status() == TaskStatus::Running
        && let Some(execution) = &latest
        && execution.status == ExecutionStatus::Running
        && execution.progress == 0
        && locks.info(task_name, &instance_key)?.is_none()
        && now.signed_duration_since(execution.started_at)
            > chrono::Duration::seconds(config.worker_startup_timeout_seconds as i64)
    {
        warn!(task = %task_ref, execution_id = %execution.id, "{STARTUP_FAILURE_MESSAGE}");
        store.append_execution_log(
            execution.id,
            LogLevel::Error,
            STARTUP_FAILURE_MESSAGE,
            now,
        )?;
        store.finalize_execution(
            execution.id,
            ExecutionStatus::Failed,
            Some(ExecutionError::new(
                STARTUP_FAILURE_MESSAGE.to_string(),
                String::new(),
            )),
            now,
        )?;
        task.set_status(TaskStatus::Failed, now);
        store.update_task(&task)?;
        latest = store.execution(execution.id)?;
    }

    // Rule 3: stop observed by the control plane but not yet by the worker.
    if task.status() == TaskStatus::Stopped
        && let Some(execution) = &latest
        && execution.status == ExecutionStatus::Running
    {
        info!(
            task = %task_ref,
            execution_id = %execution.id,
            "task stopped with execution still running; stopping the execution"
        );
        store.finalize_execution(execution.id, ExecutionStatus::Stopped, None, now)?;
        if locks.info(task_name, &instance_key)?.is_some() {
            locks.remove(task_name, &instance_key)?;
        }
        latest = store.execution(execution.id)?;
    }

    let pending_new_execution = task.status() == TaskStatus::Running
        && latest
            .as_ref()
            .map(|execution| execution.status.is_terminal())
            .unwrap_or(false);

    let progress = if pending_new_execution {
        0
    } else {
        latest.as_ref().map(|execution| execution.progress).unwrap_or(0)
    };

    Ok(TaskStatusReport {
        task_id: task_ref.task_id,
        task_type: task_ref.task_type,
        status: task.status(),
        progress,
        pending_new_execution,
        execution: latest.as_ref().map(ExecutionSummary::from),
        error_message: latest.and_then(|execution| execution.error_message),
    })
}
