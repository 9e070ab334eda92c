use std::time::{Duration, Instant};
use tiller_integration::lock::TaskLockManager;

use crate::error::TillerError;
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::{TaskRef, TaskStatus};

/// Cancellation checks of the lock record are throttled to this interval.
const STOP_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// What the worker should do after a control poll.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlAction {
    Continue,
    Pause,
    Resume,
    Stop(StopSource),
}

/// Which channel requested the stop.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StopSource {
    /// The lock record was flagged `STOP_REQUESTED`.
    LockStopRequested,
    /// The persisted task status changed to `STOPPED`.
    TaskStopped,
    /// Heartbeats stopped landing: another worker holds the lock, or the record is gone.
    LockLost,
}

/// Unified poll over the two independent cancellation channels: the lock record's stop flag
/// (worker-visible) and the persisted task status (control-plane-visible). Both lead to the
/// same shutdown sequence.
///
/// Lock checks are throttled to once a second, task-status reads to the configured poll
/// interval, so the hot tick loop can poll every iteration.
pub struct ControlSignals<'a> {
    locks: &'a dyn TaskLockManager,
    store: &'a dyn LifecycleStore,
    task: TaskRef,
    last_status: TaskStatus,
    status_poll_interval: Duration,
    last_status_poll: Instant,
    last_stop_check: Instant,
}

impl std::fmt::Debug for ControlSignals<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSignals")
            .field("task", &self.task)
            .field("last_status", &self.last_status)
            .finish()
    }
}

impl<'a> ControlSignals<'a> {
    pub fn new(
        locks: &'a dyn TaskLockManager,
        store: &'a dyn LifecycleStore,
        task: TaskRef,
        initial_status: TaskStatus,
        status_poll_interval: Duration,
    ) -> Self {
        let past = Instant::now()
            .checked_sub(STOP_CHECK_INTERVAL.max(status_poll_interval))
            .unwrap_or_else(Instant::now);
        Self {
            locks,
            store,
            task,
            last_status: initial_status,
            status_poll_interval,
            // First poll runs immediately.
            last_status_poll: past,
            last_stop_check: past,
        }
    }

    pub fn poll(&mut self) -> Result<ControlAction, TillerError> {
        if self.last_stop_check.elapsed() >= STOP_CHECK_INTERVAL {
            self.last_stop_check = Instant::now();
            let info = self
                .locks
                .info(self.task.task_type.task_name(), &self.task.instance_key())?;
            if let Some(info) = info
                && info.stop_requested()
            {
                return Ok(ControlAction::Stop(StopSource::LockStopRequested));
            }
        }

        if self.last_status_poll.elapsed() >= self.status_poll_interval {
            self.last_status_poll = Instant::now();
            if let Some(task) = self.store.task(self.task)? {
                let current = task.status();
                if current != self.last_status {
                    let previous = std::mem::replace(&mut self.last_status, current);
                    return Ok(match current {
                        TaskStatus::Paused => ControlAction::Pause,
                        TaskStatus::Running if previous == TaskStatus::Paused => {
                            ControlAction::Resume
                        }
                        TaskStatus::Stopped => ControlAction::Stop(StopSource::TaskStopped),
                        _ => ControlAction::Continue,
                    });
                }
            }
        }

        Ok(ControlAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::store::memory::InMemoryStore;
    use crate::lifecycle::task::BacktestTask;
    use crate::lifecycle::{ConfigId, TaskId, UserId};
    use crate::lifecycle::task::Task;
    use crate::lifecycle::store::LifecycleStore as _;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;
    use tiller_integration::lock::memory::InMemoryLockManager;

    fn seeded_task(store: &InMemoryStore, status: TaskStatus) -> TaskRef {
        let now = Utc::now();
        let task = store
            .insert_task(Task::Backtest(BacktestTask {
                id: TaskId(0),
                owner: UserId(1),
                name: "bt".into(),
                config_id: ConfigId(1),
                status,
                start_time: now,
                end_time: now + chrono::Duration::hours(1),
                initial_balance: dec!(1000),
                data_source: SmolStr::new("test"),
                created_at: now,
                updated_at: now,
            }))
            .unwrap();
        task.task_ref()
    }

    #[test]
    fn test_stop_request_on_lock_wins_over_status() {
        let store = InMemoryStore::new();
        let locks = InMemoryLockManager::new();
        let task = seeded_task(&store, TaskStatus::Running);

        locks
            .acquire(
                task.task_type.task_name(),
                &task.instance_key(),
                "w",
                serde_json::json!({}),
                Duration::from_secs(130),
            )
            .unwrap();
        locks
            .request_stop(
                task.task_type.task_name(),
                &task.instance_key(),
                "stop_requested mode=graceful",
            )
            .unwrap();

        let mut signals = ControlSignals::new(
            &locks,
            &store,
            task,
            TaskStatus::Running,
            Duration::from_secs(0),
        );
        assert_eq!(
            signals.poll().unwrap(),
            ControlAction::Stop(StopSource::LockStopRequested)
        );
    }

    #[test]
    fn test_status_change_drives_pause_resume_stop() {
        let store = InMemoryStore::new();
        let locks = InMemoryLockManager::new();
        let task = seeded_task(&store, TaskStatus::Running);

        let mut signals = ControlSignals::new(
            &locks,
            &store,
            task,
            TaskStatus::Running,
            Duration::from_secs(0),
        );
        assert_eq!(signals.poll().unwrap(), ControlAction::Continue);

        store
            .compare_and_set_status(task, &[TaskStatus::Running], TaskStatus::Paused, Utc::now())
            .unwrap();
        assert_eq!(signals.poll().unwrap(), ControlAction::Pause);

        store
            .compare_and_set_status(task, &[TaskStatus::Paused], TaskStatus::Running, Utc::now())
            .unwrap();
        assert_eq!(signals.poll().unwrap(), ControlAction::Resume);

        store
            .compare_and_set_status(task, &[TaskStatus::Running], TaskStatus::Stopped, Utc::now())
            .unwrap();
        assert_eq!(
            signals.poll().unwrap(),
            ControlAction::Stop(StopSource::TaskStopped)
        );
    }
}
