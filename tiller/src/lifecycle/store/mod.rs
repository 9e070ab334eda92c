use chrono::{DateTime, Utc};
use thiserror::Error;

use super::execution::{
    EquityPoint, Execution, ExecutionError, LogLevel, MetricsCheckpoint, StrategyEventRecord,
    TradeLogEntry,
};
use super::task::{Account, StrategyConfig, Task, TradingTask};
use super::{AccountId, ConfigId, ExecutionId, TaskRef, TaskStatus, TaskType};
use crate::Sequence;
use crate::statistic::ExecutionMetrics;
use crate::strategy::event::StrategyEvent;

pub mod memory;
pub mod redis;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A compare-and-set transition observed a different current status.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Write refused because the target record is immutable.
    #[error("immutable: {0}")]
    Immutable(String),

    #[error("store transport: {0}")]
    Transport(String),

    #[error("store codec: {0}")]
    Codec(String),
}

/// Durable, queryable state for every task, execution and append-only child record.
///
/// Identifier assignment is server-side: insert operations allocate ids. Append operations
/// assign the next dense per-execution [`Sequence`] and return it.
pub trait LifecycleStore: Send + Sync {
    // --- strategy configs
    fn insert_config(&self, config: StrategyConfig) -> Result<StrategyConfig, StoreError>;
    fn config(&self, id: ConfigId) -> Result<Option<StrategyConfig>, StoreError>;
    fn delete_config(&self, id: ConfigId) -> Result<(), StoreError>;

    // --- accounts
    fn insert_account(&self, account: Account) -> Result<Account, StoreError>;
    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    // --- tasks
    /// Insert a task, enforcing the unique `(owner, name)` constraint per task type.
    fn insert_task(&self, task: Task) -> Result<Task, StoreError>;
    fn task(&self, task: TaskRef) -> Result<Option<Task>, StoreError>;
    fn update_task(&self, task: &Task) -> Result<(), StoreError>;
    fn tasks(&self, task_type: TaskType) -> Result<Vec<Task>, StoreError>;
    fn trading_tasks_for_account(&self, account: AccountId)
    -> Result<Vec<TradingTask>, StoreError>;
    fn tasks_referencing_config(&self, id: ConfigId) -> Result<Vec<Task>, StoreError>;

    /// Atomically transition a task's status, failing with [`StoreError::Conflict`] when the
    /// current status is not in `from`. This is the transaction backing the state machine's
    /// read-then-write guards.
    fn compare_and_set_status(
        &self,
        task: TaskRef,
        from: &[TaskStatus],
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError>;

    /// Persist the opaque strategy checkpoint of a trading task.
    fn update_strategy_state(
        &self,
        task: TaskRef,
        state: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // --- executions
    /// Create the next execution for a task: `execution_number = max + 1`, status `RUNNING`,
    /// progress 0. Allocation is atomic per task, keeping the numbers dense and monotone.
    fn allocate_execution(
        &self,
        task: TaskRef,
        now: DateTime<Utc>,
    ) -> Result<Execution, StoreError>;
    fn execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError>;
    fn latest_execution(&self, task: TaskRef) -> Result<Option<Execution>, StoreError>;
    fn executions(&self, task: TaskRef) -> Result<Vec<Execution>, StoreError>;

    /// Worker claim of a dispatcher-allocated execution: reset to `RUNNING`/progress 0 and
    /// stamp `started_at`.
    fn mark_execution_running(
        &self,
        id: ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<Execution, StoreError>;

    fn update_execution_progress(&self, id: ExecutionId, progress: u8)
    -> Result<(), StoreError>;

    fn append_execution_log(
        &self,
        id: ExecutionId,
        level: LogLevel,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Set the terminal status once. Finalizing an already-terminal execution is a no-op, so
    /// crash-recovery paths can call it unconditionally.
    fn finalize_execution(
        &self,
        id: ExecutionId,
        status: super::ExecutionStatus,
        error: Option<ExecutionError>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // --- append-only children
    fn append_event(
        &self,
        id: ExecutionId,
        event: StrategyEvent,
    ) -> Result<Sequence, StoreError>;
    fn append_trade(&self, id: ExecutionId, trade: TradeLogEntry)
    -> Result<Sequence, StoreError>;
    fn append_equity_point(
        &self,
        id: ExecutionId,
        point: EquityPoint,
    ) -> Result<Sequence, StoreError>;

    fn events_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<StrategyEventRecord>, StoreError>;
    fn trades_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<TradeLogEntry>, StoreError>;
    fn equity_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<EquityPoint>, StoreError>;

    // --- metrics
    fn write_metrics_checkpoint(
        &self,
        id: ExecutionId,
        checkpoint: MetricsCheckpoint,
    ) -> Result<(), StoreError>;
    fn metrics_checkpoints(&self, id: ExecutionId)
    -> Result<Vec<MetricsCheckpoint>, StoreError>;

    /// Write the final metrics of a terminally-successful execution. Refuses overwrites -
    /// final metrics are immutable once written.
    fn write_final_metrics(
        &self,
        id: ExecutionId,
        metrics: ExecutionMetrics,
    ) -> Result<(), StoreError>;
    fn final_metrics(&self, id: ExecutionId) -> Result<Option<ExecutionMetrics>, StoreError>;
}
