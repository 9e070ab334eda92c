use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use smol_str::SmolStr;
use std::fmt;
use std::sync::Arc;
use tiller_integration::lock::TaskLockManager;
use tracing::info;

use super::execution::{EquityPoint, Execution, MetricsCheckpoint, StrategyEventRecord, TradeLogEntry};
use super::reconcile::{TaskStatusReport, reconcile_and_report};
use super::store::{LifecycleStore, StoreError};
use super::task::{Account, BacktestTask, StrategyConfig, Task, TradingTask};
use super::{
    AccountId, ConfigId, ExecutionId, ExecutionStatus, StopMode, TaskId, TaskRef, TaskStatus,
    TaskType, UserId,
};
use crate::Sequence;
use crate::config::PlatformConfig;
use crate::dispatch::Dispatcher;
use crate::error::TillerError;
use crate::statistic::ExecutionMetrics;
use crate::strategy::registry::{StrategyInfo, StrategyRegistry};

/// Control-plane facade over the task state machine.
///
/// Validates every request against the state-machine guards, mutates the lifecycle store, and
/// asks the dispatcher to enqueue work. The HTTP layer is a thin verb-per-method mapping over
/// this service; errors carry the 400/404/409 taxonomy.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn LifecycleStore>,
    locks: Arc<dyn TaskLockManager>,
    dispatcher: Dispatcher,
    registry: Arc<StrategyRegistry>,
    config: Arc<PlatformConfig>,
}

impl fmt::Debug for TaskService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskService").finish()
    }
}

impl TaskService {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        locks: Arc<dyn TaskLockManager>,
        dispatcher: Dispatcher,
        registry: Arc<StrategyRegistry>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        Self {
            store,
            locks,
            dispatcher,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    // --- strategy configs -------------------------------------------------------------------

    pub fn create_config(
        &self,
        owner: UserId,
        name: impl Into<String>,
        strategy_type: impl Into<SmolStr>,
        parameters: Value,
    ) -> Result<StrategyConfig, TillerError> {
        let strategy_type = strategy_type.into();
        self.registry.validate(&strategy_type, &parameters)?;

        Ok(self.store.insert_config(StrategyConfig {
            id: ConfigId::default(),
            owner,
            name: name.into(),
            strategy_type,
            parameters,
            created_at: Utc::now(),
        })?)
    }

    /// Delete a config unless a task in `RUNNING`/`PAUSED` still references it.
    pub fn delete_config(&self, id: ConfigId) -> Result<(), TillerError> {
        let in_use = self
            .store
            .tasks_referencing_config(id)?
            .into_iter()
            .find(|task| matches!(task.status(), TaskStatus::Running | TaskStatus::Paused));

        if let Some(task) = in_use {
            return Err(TillerError::conflict(format!(
                "strategy config {id} is in use by task '{}'",
                task.name()
            )));
        }
        Ok(self.store.delete_config(id)?)
    }

    // --- accounts ---------------------------------------------------------------------------

    pub fn register_account(
        &self,
        owner: UserId,
        name: impl Into<String>,
        balance: Decimal,
        active: bool,
    ) -> Result<Account, TillerError> {
        Ok(self.store.insert_account(Account {
            id: AccountId::default(),
            owner,
            name: name.into(),
            balance,
            active,
        })?)
    }

    // --- task creation ----------------------------------------------------------------------

    pub fn create_trading_task(
        &self,
        owner: UserId,
        name: impl Into<String>,
        config_id: ConfigId,
        account_id: AccountId,
    ) -> Result<TradingTask, TillerError> {
        let config = self.load_config(config_id)?;
        if config.owner != owner {
            return Err(TillerError::validation(
                "strategy config does not belong to the user",
            ));
        }
        let account = self.load_account(account_id)?;
        if account.owner != owner {
            return Err(TillerError::validation(
                "account does not belong to the user",
            ));
        }

        let now = Utc::now();
        let task = self.store.insert_task(Task::Trading(TradingTask {
            id: TaskId::default(),
            owner,
            name: name.into(),
            config_id,
            account_id,
            status: TaskStatus::Created,
            strategy_state: Value::Object(Map::new()),
            created_at: now,
            updated_at: now,
        }))?;

        match task {
            Task::Trading(task) => Ok(task),
            Task::Backtest(_) => unreachable!("inserted a trading task"),
        }
    }

    pub fn create_backtest_task(
        &self,
        owner: UserId,
        name: impl Into<String>,
        config_id: ConfigId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        initial_balance: Decimal,
        data_source: impl Into<SmolStr>,
    ) -> Result<BacktestTask, TillerError> {
        if end_time <= start_time {
            return Err(TillerError::validation("end_time must be after start_time"));
        }
        let config = self.load_config(config_id)?;
        if config.owner != owner {
            return Err(TillerError::validation(
                "strategy config does not belong to the user",
            ));
        }

        let now = Utc::now();
        let task = self.store.insert_task(Task::Backtest(BacktestTask {
            id: TaskId::default(),
            owner,
            name: name.into(),
            config_id,
            status: TaskStatus::Created,
            start_time,
            end_time,
            initial_balance,
            data_source: data_source.into(),
            created_at: now,
            updated_at: now,
        }))?;

        match task {
            Task::Backtest(task) => Ok(task),
            Task::Trading(_) => unreachable!("inserted a backtest task"),
        }
    }

    /// Duplicate a task under a new unique name. Status resets to `CREATED`; saved strategy
    /// state is not copied.
    pub fn copy_task(&self, task: TaskRef, new_name: impl Into<String>) -> Result<Task, TillerError> {
        let new_name = new_name.into();
        let source = self.load_task(task)?;
        if source.name() == new_name {
            return Err(TillerError::validation(
                "new name must be different from the current name",
            ));
        }

        let now = Utc::now();
        let copy = match source {
            Task::Trading(source) => Task::Trading(TradingTask {
                id: TaskId::default(),
                name: new_name,
                status: TaskStatus::Created,
                strategy_state: Value::Object(Map::new()),
                created_at: now,
                updated_at: now,
                ..source
            }),
            Task::Backtest(source) => Task::Backtest(BacktestTask {
                id: TaskId::default(),
                name: new_name,
                status: TaskStatus::Created,
                created_at: now,
                updated_at: now,
                ..source
            }),
        };

        self.store.insert_task(copy).map_err(|err| match err {
            StoreError::Duplicate(message) => TillerError::validation(message),
            other => other.into(),
        })
    }

    // --- lifecycle verbs --------------------------------------------------------------------

    /// Start a task from `CREATED`, allocating and enqueueing its first execution.
    pub fn start(&self, task: TaskRef) -> Result<ExecutionId, TillerError> {
        match self.load_task(task)? {
            Task::Trading(trading) => {
                self.validate_trading(&trading)?;
                self.assert_account_available(trading.account_id, trading.id)?;
            }
            Task::Backtest(backtest) => self.validate_backtest(&backtest)?,
        }

        self.transition(task, &[TaskStatus::Created], TaskStatus::Running, |current| {
            match current {
                TaskStatus::Running => "Task is already running".to_string(),
                other => format!("cannot start a task in status {other}; use restart or resume"),
            }
        })?;

        let execution_id = self.dispatcher.enqueue_run(task)?;
        info!(task = %task, execution_id = %execution_id, "task started");
        Ok(execution_id)
    }

    /// Stop a running task. The task status flips immediately; the worker observes it (or the
    /// lock flag) within one poll interval and winds down.
    pub fn stop(&self, task: TaskRef, mode: StopMode) -> Result<(), TillerError> {
        let loaded = self.load_task(task)?;

        let from: &[TaskStatus] = match task.task_type {
            TaskType::Trading => &[TaskStatus::Running, TaskStatus::Paused],
            TaskType::Backtest => &[TaskStatus::Running],
        };
        self.transition(task, from, TaskStatus::Stopped, |current| {
            format!("cannot stop a task in status {current}")
        })?;

        // The stop is authoritative: mark an in-flight execution stopped right away rather
        // than waiting for the worker to notice.
        if let Some(latest) = self.store.latest_execution(task)?
            && !latest.status.is_terminal()
        {
            self.store.finalize_execution(
                latest.id,
                ExecutionStatus::Stopped,
                None,
                Utc::now(),
            )?;
        }

        self.locks.request_stop(
            task.task_type.task_name(),
            &task.instance_key(),
            &format!("stop_requested mode={mode}"),
        )?;

        if mode == StopMode::GracefulClose {
            if let Task::Trading(trading) = &loaded {
                // Resume is disabled from here on: the checkpoint is gone before the
                // position-closing job runs.
                self.store
                    .update_strategy_state(task, &Value::Object(Map::new()), Utc::now())?;
                self.dispatcher
                    .enqueue_close_positions(task, trading.account_id)?;
            }
        }

        info!(task = %task, %mode, "task stop requested");
        Ok(())
    }

    /// Pause a running trading task. Backtests cannot pause.
    pub fn pause(&self, task: TaskRef) -> Result<(), TillerError> {
        if task.task_type == TaskType::Backtest {
            return Err(TillerError::validation("backtest tasks cannot be paused"));
        }

        self.transition(task, &[TaskStatus::Running], TaskStatus::Paused, |current| {
            format!("cannot pause a task in status {current}")
        })?;
        info!(task = %task, "task paused");
        Ok(())
    }

    /// Resume a trading task.
    ///
    /// From `PAUSED` the in-flight execution continues (no new execution; the worker invokes
    /// the strategy's resume callback). From a terminal status with saved strategy state, a
    /// new execution is enqueued that continues from the checkpoint.
    pub fn resume(&self, task: TaskRef) -> Result<Option<ExecutionId>, TillerError> {
        if task.task_type == TaskType::Backtest {
            return Err(TillerError::validation("backtest tasks cannot be resumed"));
        }
        let trading = match self.load_task(task)? {
            Task::Trading(trading) => trading,
            Task::Backtest(_) => unreachable!("checked task type above"),
        };

        if trading.status == TaskStatus::Paused {
            self.assert_account_available(trading.account_id, trading.id)?;
            self.transition(task, &[TaskStatus::Paused], TaskStatus::Running, |current| {
                format!("cannot resume a task in status {current}")
            })?;
            info!(task = %task, "task resumed in place");
            return Ok(None);
        }

        if !trading.can_resume() {
            return Err(TillerError::conflict(
                "task has no saved strategy state to resume from",
            ));
        }

        self.validate_trading(&trading)?;
        self.assert_account_available(trading.account_id, trading.id)?;
        self.transition(
            task,
            &[TaskStatus::Stopped, TaskStatus::Failed, TaskStatus::Created],
            TaskStatus::Running,
            |current| format!("cannot resume a task in status {current}"),
        )?;

        let execution_id = self.dispatcher.enqueue_run(task)?;
        info!(task = %task, execution_id = %execution_id, "task resumed with new execution");
        Ok(Some(execution_id))
    }

    /// Restart a stopped/failed (or never-started) task with a fresh execution, optionally
    /// clearing the saved strategy state first.
    pub fn restart(&self, task: TaskRef, clear_state: bool) -> Result<ExecutionId, TillerError> {
        let loaded = self.load_task(task)?;
        if matches!(loaded.status(), TaskStatus::Running | TaskStatus::Paused) {
            return Err(TillerError::conflict(
                "cannot restart a task that is currently running or paused; stop it first",
            ));
        }

        let from: &[TaskStatus] = match task.task_type {
            TaskType::Trading => &[TaskStatus::Created, TaskStatus::Stopped, TaskStatus::Failed],
            TaskType::Backtest => &[
                TaskStatus::Created,
                TaskStatus::Stopped,
                TaskStatus::Failed,
                TaskStatus::Completed,
            ],
        };

        match &loaded {
            Task::Trading(trading) => {
                self.validate_trading(trading)?;
                self.assert_account_available(trading.account_id, trading.id)?;
                if clear_state {
                    self.store
                        .update_strategy_state(task, &Value::Object(Map::new()), Utc::now())?;
                }
            }
            Task::Backtest(backtest) => self.validate_backtest(backtest)?,
        }

        self.transition(task, from, TaskStatus::Running, |current| {
            format!("cannot restart a task in status {current}")
        })?;

        let execution_id = self.dispatcher.enqueue_run(task)?;
        info!(task = %task, execution_id = %execution_id, clear_state, "task restarted");
        Ok(execution_id)
    }

    /// Current status of a task, reconciled against worker reality (stale locks, dead
    /// workers, stop-in-flight) before reporting.
    pub fn status(&self, task: TaskRef) -> Result<TaskStatusReport, TillerError> {
        reconcile_and_report(
            self.store.as_ref(),
            self.locks.as_ref(),
            &self.config,
            task,
            Utc::now(),
        )
    }

    // --- execution reads --------------------------------------------------------------------

    pub fn execution(&self, id: ExecutionId) -> Result<Execution, TillerError> {
        self.store
            .execution(id)?
            .ok_or_else(|| TillerError::not_found(format!("execution {id}")))
    }

    pub fn events_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<StrategyEventRecord>, TillerError> {
        self.execution(id)?;
        Ok(self.store.events_since(id, since, limit)?)
    }

    pub fn trades_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<TradeLogEntry>, TillerError> {
        self.execution(id)?;
        Ok(self.store.trades_since(id, since, limit)?)
    }

    pub fn equity_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<EquityPoint>, TillerError> {
        self.execution(id)?;
        Ok(self.store.equity_since(id, since, limit)?)
    }

    /// Final metrics of an execution; `None` until the worker has written them.
    pub fn execution_metrics(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionMetrics>, TillerError> {
        self.execution(id)?;
        Ok(self.store.final_metrics(id)?)
    }

    pub fn metrics_checkpoints(
        &self,
        id: ExecutionId,
    ) -> Result<Vec<MetricsCheckpoint>, TillerError> {
        self.execution(id)?;
        Ok(self.store.metrics_checkpoints(id)?)
    }

    pub fn strategy_info(&self) -> Vec<StrategyInfo> {
        self.registry.all_info()
    }

    // --- guards -----------------------------------------------------------------------------

    fn transition(
        &self,
        task: TaskRef,
        from: &[TaskStatus],
        to: TaskStatus,
        conflict_message: impl Fn(TaskStatus) -> String,
    ) -> Result<Task, TillerError> {
        self.store
            .compare_and_set_status(task, from, to, Utc::now())
            .map_err(|err| match err {
                StoreError::Conflict(_) => {
                    let current = self
                        .store
                        .task(task)
                        .ok()
                        .flatten()
                        .map(|task| task.status())
                        .unwrap_or(TaskStatus::Created);
                    TillerError::conflict(conflict_message(current))
                }
                StoreError::NotFound(message) => TillerError::not_found(message),
                other => other.into(),
            })
    }

    /// One-active-per-account guard: refuse when another trading task on the same account is
    /// in `RUNNING`. The worker lock is the second, independent barrier.
    fn assert_account_available(
        &self,
        account: AccountId,
        excluding: TaskId,
    ) -> Result<(), TillerError> {
        let other = self
            .store
            .trading_tasks_for_account(account)?
            .into_iter()
            .find(|task| task.id != excluding && task.status == TaskStatus::Running);

        if let Some(other) = other {
            return Err(TillerError::conflict(format!(
                "another task '{}' is already running on this account; only one task can run \
                 per account at a time",
                other.name
            )));
        }
        Ok(())
    }

    fn validate_trading(&self, task: &TradingTask) -> Result<(), TillerError> {
        let config = self.load_config(task.config_id)?;
        self.registry
            .validate(&config.strategy_type, &config.parameters)?;

        let account = self.load_account(task.account_id)?;
        if account.owner != task.owner {
            return Err(TillerError::validation(
                "account does not belong to the user",
            ));
        }
        if !account.active {
            return Err(TillerError::validation("account is not active"));
        }
        Ok(())
    }

    fn validate_backtest(&self, task: &BacktestTask) -> Result<(), TillerError> {
        if task.end_time <= task.start_time {
            return Err(TillerError::validation("end_time must be after start_time"));
        }
        let config = self.load_config(task.config_id)?;
        self.registry
            .validate(&config.strategy_type, &config.parameters)
    }

    fn load_task(&self, task: TaskRef) -> Result<Task, TillerError> {
        self.store
            .task(task)?
            .ok_or_else(|| TillerError::not_found(format!("task {task}")))
    }

    fn load_config(&self, id: ConfigId) -> Result<StrategyConfig, TillerError> {
        self.store
            .config(id)?
            .ok_or_else(|| TillerError::not_found(format!("strategy config {id}")))
    }

    fn load_account(&self, id: AccountId) -> Result<Account, TillerError> {
        self.store
            .account(id)?
            .ok_or_else(|| TillerError::not_found(format!("account {id}")))
    }
}
