use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{LifecycleStore, StoreError};
use crate::Sequence;
use crate::lifecycle::execution::{
    EquityPoint, Execution, ExecutionError, LogLevel, MetricsCheckpoint, StrategyEventRecord,
    TradeLogEntry,
};
use crate::lifecycle::task::{Account, StrategyConfig, Task, TradingTask};
use crate::lifecycle::{
    AccountId, ConfigId, ExecutionId, ExecutionStatus, TaskId, TaskRef, TaskStatus, TaskType,
};
use crate::statistic::ExecutionMetrics;
use crate::strategy::event::StrategyEvent;

#[derive(Debug, Default)]
struct Inner {
    next_config_id: u64,
    next_account_id: u64,
    next_task_id: u64,
    next_execution_id: u64,
    configs: FnvHashMap<ConfigId, StrategyConfig>,
    accounts: FnvHashMap<AccountId, Account>,
    tasks: FnvHashMap<TaskRef, Task>,
    executions: FnvHashMap<ExecutionId, Execution>,
    execution_index: FnvHashMap<TaskRef, Vec<ExecutionId>>,
    events: FnvHashMap<ExecutionId, Vec<StrategyEventRecord>>,
    trades: FnvHashMap<ExecutionId, Vec<TradeLogEntry>>,
    equity: FnvHashMap<ExecutionId, Vec<EquityPoint>>,
    checkpoints: FnvHashMap<ExecutionId, Vec<MetricsCheckpoint>>,
    final_metrics: FnvHashMap<ExecutionId, ExecutionMetrics>,
}

/// In-memory lifecycle store used for tests and single-process deployments.
///
/// A single mutex makes every operation atomic, which is exactly the transactional behaviour
/// the compare-and-set transitions and execution allocation rely on.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LifecycleStore for InMemoryStore {
    fn insert_config(&self, mut config: StrategyConfig) -> Result<StrategyConfig, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_config_id += 1;
        config.id = ConfigId(inner.next_config_id);
        inner.configs.insert(config.id, config.clone());
        Ok(config)
    }

    fn config(&self, id: ConfigId) -> Result<Option<StrategyConfig>, StoreError> {
        Ok(self.inner.lock().configs.get(&id).cloned())
    }

    fn delete_config(&self, id: ConfigId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner
            .configs
            .remove(&id)
            .map(drop)
            .ok_or_else(|| StoreError::NotFound(format!("strategy config {id}")))
    }

    fn insert_account(&self, mut account: Account) -> Result<Account, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_account_id += 1;
        account.id = AccountId(inner.next_account_id);
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.lock().accounts.get(&id).cloned())
    }

    fn insert_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock();

        let task_type = task.task_ref().task_type;
        let duplicate = inner.tasks.values().any(|existing| {
            existing.task_ref().task_type == task_type
                && existing.owner() == task.owner()
                && existing.name() == task.name()
        });
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "{task_type} task named '{}' already exists for this user",
                task.name()
            )));
        }

        inner.next_task_id += 1;
        let id = TaskId(inner.next_task_id);
        match &mut task {
            Task::Trading(trading) => trading.id = id,
            Task::Backtest(backtest) => backtest.id = id,
        }
        inner.tasks.insert(task.task_ref(), task.clone());
        Ok(task)
    }

    fn task(&self, task: TaskRef) -> Result<Option<Task>, StoreError> {
        Ok(self.inner.lock().tasks.get(&task).cloned())
    }

    fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let key = task.task_ref();
        if !inner.tasks.contains_key(&key) {
            return Err(StoreError::NotFound(format!("task {key}")));
        }
        inner.tasks.insert(key, task.clone());
        Ok(())
    }

    fn tasks(&self, task_type: TaskType) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| task.task_ref().task_type == task_type)
            .cloned()
            .collect();
        tasks.sort_by_key(Task::id);
        Ok(tasks)
    }

    fn trading_tasks_for_account(
        &self,
        account: AccountId,
    ) -> Result<Vec<TradingTask>, StoreError> {
        let inner = self.inner.lock();
        let mut tasks: Vec<TradingTask> = inner
            .tasks
            .values()
            .filter_map(Task::as_trading)
            .filter(|task| task.account_id == account)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    fn tasks_referencing_config(&self, id: ConfigId) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| task.config_id() == id)
            .cloned()
            .collect();
        tasks.sort_by_key(Task::id);
        Ok(tasks)
    }

    fn compare_and_set_status(
        &self,
        task: TaskRef,
        from: &[TaskStatus],
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .tasks
            .get_mut(&task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;

        let current = record.status();
        if !from.contains(&current) {
            return Err(StoreError::Conflict(format!(
                "task {task} is {current}, expected one of {from:?}"
            )));
        }
        record.set_status(to, now);
        Ok(record.clone())
    }

    fn update_strategy_state(
        &self,
        task: TaskRef,
        state: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .tasks
            .get_mut(&task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;

        match record {
            Task::Trading(trading) => {
                trading.strategy_state = state.clone();
                trading.updated_at = now;
                Ok(())
            }
            Task::Backtest(_) => Err(StoreError::Conflict(format!(
                "task {task} is a backtest; strategy state applies to trading tasks"
            ))),
        }
    }

    fn allocate_execution(
        &self,
        task: TaskRef,
        now: DateTime<Utc>,
    ) -> Result<Execution, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_execution_id += 1;
        let id = ExecutionId(inner.next_execution_id);

        let index = inner.execution_index.entry(task).or_default();
        let execution_number = index.len() as u32 + 1;
        index.push(id);

        let execution = Execution {
            id,
            task_type: task.task_type,
            task_id: task.task_id,
            execution_number,
            status: ExecutionStatus::Running,
            progress: 0,
            started_at: now,
            completed_at: None,
            error_message: None,
            error_traceback: None,
            logs: Vec::new(),
        };
        inner.executions.insert(id, execution.clone());
        Ok(execution)
    }

    fn execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self.inner.lock().executions.get(&id).cloned())
    }

    fn latest_execution(&self, task: TaskRef) -> Result<Option<Execution>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .execution_index
            .get(&task)
            .and_then(|index| index.last())
            .and_then(|id| inner.executions.get(id))
            .cloned())
    }

    fn executions(&self, task: TaskRef) -> Result<Vec<Execution>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .execution_index
            .get(&task)
            .map(|index| {
                index
                    .iter()
                    .filter_map(|id| inner.executions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn mark_execution_running(
        &self,
        id: ExecutionId,
        _now: DateTime<Utc>,
    ) -> Result<Execution, StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;

        if execution.status != ExecutionStatus::Running || execution.progress != 0 {
            execution.status = ExecutionStatus::Running;
            execution.progress = 0;
        }
        Ok(execution.clone())
    }

    fn update_execution_progress(
        &self,
        id: ExecutionId,
        progress: u8,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;
        execution.progress = progress.min(100);
        Ok(())
    }

    fn append_execution_log(
        &self,
        id: ExecutionId,
        level: LogLevel,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;
        execution.push_log(level, message, now);
        Ok(())
    }

    fn finalize_execution(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        error: Option<ExecutionError>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;

        // Terminal executions never change again.
        if execution.status.is_terminal() {
            return Ok(());
        }

        execution.status = status;
        execution.completed_at = Some(now);
        if let Some(error) = error {
            execution.error_message = Some(error.message);
            execution.error_traceback = Some(error.traceback);
        }
        Ok(())
    }

    fn append_event(&self, id: ExecutionId, event: StrategyEvent) -> Result<Sequence, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.executions.contains_key(&id) {
            return Err(StoreError::NotFound(format!("execution {id}")));
        }
        let events = inner.events.entry(id).or_default();
        let sequence = Sequence(events.len() as u64 + 1);
        events.push(StrategyEventRecord::new(sequence, event));
        Ok(sequence)
    }

    fn append_trade(
        &self,
        id: ExecutionId,
        mut trade: TradeLogEntry,
    ) -> Result<Sequence, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.executions.contains_key(&id) {
            return Err(StoreError::NotFound(format!("execution {id}")));
        }
        let trades = inner.trades.entry(id).or_default();
        let sequence = Sequence(trades.len() as u64 + 1);
        trade.sequence = sequence;
        trades.push(trade);
        Ok(sequence)
    }

    fn append_equity_point(
        &self,
        id: ExecutionId,
        mut point: EquityPoint,
    ) -> Result<Sequence, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.executions.contains_key(&id) {
            return Err(StoreError::NotFound(format!("execution {id}")));
        }
        let points = inner.equity.entry(id).or_default();
        let sequence = Sequence(points.len() as u64 + 1);
        point.sequence = sequence;
        points.push(point);
        Ok(sequence)
    }

    fn events_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<StrategyEventRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(read_since(inner.events.get(&id), since, limit))
    }

    fn trades_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<TradeLogEntry>, StoreError> {
        let inner = self.inner.lock();
        Ok(read_since(inner.trades.get(&id), since, limit))
    }

    fn equity_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<EquityPoint>, StoreError> {
        let inner = self.inner.lock();
        Ok(read_since(inner.equity.get(&id), since, limit))
    }

    fn write_metrics_checkpoint(
        &self,
        id: ExecutionId,
        checkpoint: MetricsCheckpoint,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.executions.contains_key(&id) {
            return Err(StoreError::NotFound(format!("execution {id}")));
        }
        inner.checkpoints.entry(id).or_default().push(checkpoint);
        Ok(())
    }

    fn metrics_checkpoints(
        &self,
        id: ExecutionId,
    ) -> Result<Vec<MetricsCheckpoint>, StoreError> {
        Ok(self
            .inner
            .lock()
            .checkpoints
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn write_final_metrics(
        &self,
        id: ExecutionId,
        metrics: ExecutionMetrics,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.final_metrics.contains_key(&id) {
            return Err(StoreError::Immutable(format!(
                "final metrics for execution {id} already written"
            )));
        }
        inner.final_metrics.insert(id, metrics);
        Ok(())
    }

    fn final_metrics(&self, id: ExecutionId) -> Result<Option<ExecutionMetrics>, StoreError> {
        Ok(self.inner.lock().final_metrics.get(&id).cloned())
    }
}

fn read_since<T: Clone>(records: Option<&Vec<T>>, since: Sequence, limit: usize) -> Vec<T> {
    records
        .map(|records| {
            records
                .iter()
                .skip(since.value() as usize)
                .take(limit)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::task::BacktestTask;
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;

    fn backtest_task(name: &str) -> Task {
        let now = Utc::now();
        Task::Backtest(BacktestTask {
            id: TaskId(0),
            owner: crate::lifecycle::UserId(1),
            name: name.to_string(),
            config_id: ConfigId(1),
            status: TaskStatus::Created,
            start_time: now,
            end_time: now + chrono::Duration::hours(1),
            initial_balance: dec!(10000),
            data_source: SmolStr::new("test"),
            created_at: now,
            updated_at: now,
        })
    }

    #[test]
    fn test_execution_numbers_are_dense_and_monotone() {
        let store = InMemoryStore::new();
        let task = store.insert_task(backtest_task("bt")).unwrap();
        let task_ref = task.task_ref();

        let numbers: Vec<u32> = (0..3)
            .map(|_| {
                store
                    .allocate_execution(task_ref, Utc::now())
                    .unwrap()
                    .execution_number
            })
            .collect();

        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(
            store
                .latest_execution(task_ref)
                .unwrap()
                .unwrap()
                .execution_number,
            3
        );
    }

    #[test]
    fn test_children_sequences_are_dense_and_cursor_reads_compose() {
        let store = InMemoryStore::new();
        let task = store.insert_task(backtest_task("bt")).unwrap();
        let execution = store.allocate_execution(task.task_ref(), Utc::now()).unwrap();

        for _ in 0..5 {
            store
                .append_event(execution.id, crate::strategy::event::StrategyEvent::new("open"))
                .unwrap();
        }

        let all = store.events_since(execution.id, Sequence(0), 100).unwrap();
        let sequences: Vec<u64> = all.iter().map(|record| record.sequence.value()).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

        // ReadChildrenSince(0) == ReadChildrenSince(k) appended to the first k records.
        let k = 2;
        let tail = store.events_since(execution.id, Sequence(k), 100).unwrap();
        let mut recomposed = all[..k as usize].to_vec();
        recomposed.extend(tail);
        assert_eq!(recomposed, all);
    }

    #[test]
    fn test_finalize_execution_is_idempotent_and_terminal() {
        let store = InMemoryStore::new();
        let task = store.insert_task(backtest_task("bt")).unwrap();
        let execution = store.allocate_execution(task.task_ref(), Utc::now()).unwrap();

        let first_completion = Utc::now();
        store
            .finalize_execution(
                execution.id,
                ExecutionStatus::Completed,
                None,
                first_completion,
            )
            .unwrap();

        // Second finalization (different status) must not un-terminalize.
        store
            .finalize_execution(
                execution.id,
                ExecutionStatus::Failed,
                Some(ExecutionError::new("late".into(), String::new())),
                Utc::now(),
            )
            .unwrap();

        let stored = store.execution(execution.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.completed_at, Some(first_completion));
        assert_eq!(stored.error_message, None);
    }

    #[test]
    fn test_unique_owner_name_per_task_type() {
        let store = InMemoryStore::new();
        store.insert_task(backtest_task("mine")).unwrap();

        let err = store.insert_task(backtest_task("mine")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn test_compare_and_set_status_rejects_unexpected_current() {
        let store = InMemoryStore::new();
        let task = store.insert_task(backtest_task("bt")).unwrap();
        let task_ref = task.task_ref();

        store
            .compare_and_set_status(
                task_ref,
                &[TaskStatus::Created],
                TaskStatus::Running,
                Utc::now(),
            )
            .unwrap();

        let err = store
            .compare_and_set_status(
                task_ref,
                &[TaskStatus::Created],
                TaskStatus::Running,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_final_metrics_are_immutable() {
        let store = InMemoryStore::new();
        let task = store.insert_task(backtest_task("bt")).unwrap();
        let execution = store.allocate_execution(task.task_ref(), Utc::now()).unwrap();

        store
            .write_final_metrics(execution.id, ExecutionMetrics::default())
            .unwrap();
        let err = store
            .write_final_metrics(execution.id, ExecutionMetrics::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Immutable(_)));
    }
}
