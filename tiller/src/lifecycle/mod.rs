use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};

/// Execution records and their append-only children.
pub mod execution;

/// Task state machine and the `TaskService` control-plane facade.
pub mod machine;

/// Read-time reconciler for executions whose workers died or never started.
pub mod reconcile;

/// Durable, queryable state for tasks, executions and append-only children.
pub mod store;

/// Task, strategy-config and account records.
pub mod task;

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct TaskId(pub u64);

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct ExecutionId(pub u64);

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct ConfigId(pub u64);

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct AccountId(pub u64);

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct UserId(pub u64);

/// Discriminates the two task variants.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[display("trading")]
    Trading,
    #[display("backtest")]
    Backtest,
}

impl TaskType {
    /// Lock namespace for workers of this task kind.
    pub fn task_name(self) -> &'static str {
        match self {
            Self::Trading => "trading",
            Self::Backtest => "backtest",
        }
    }
}

/// Identity of a task across both variants.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    Constructor,
)]
#[display("{task_type}:{task_id}")]
pub struct TaskRef {
    pub task_type: TaskType,
    pub task_id: TaskId,
}

impl TaskRef {
    /// Stringified task id used as the lock instance key.
    pub fn instance_key(&self) -> String {
        self.task_id.to_string()
    }
}

/// Task lifecycle status.
///
/// `Paused` applies to trading tasks only; `Completed` is the backtest success terminal.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[display("CREATED")]
    Created,
    #[display("RUNNING")]
    Running,
    #[display("PAUSED")]
    Paused,
    #[display("STOPPED")]
    Stopped,
    #[display("FAILED")]
    Failed,
    #[display("COMPLETED")]
    Completed,
}

/// Execution attempt status. Never re-enters `Running` once terminal.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[display("RUNNING")]
    Running,
    #[display("COMPLETED")]
    Completed,
    #[display("FAILED")]
    Failed,
    #[display("STOPPED")]
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl From<ExecutionStatus> for TaskStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Running => Self::Running,
            ExecutionStatus::Completed => Self::Completed,
            ExecutionStatus::Failed => Self::Failed,
            ExecutionStatus::Stopped => Self::Stopped,
        }
    }
}

/// How a stop request should wind the execution down.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Halt the tick loop at the next poll.
    #[display("immediate")]
    Immediate,
    /// Let in-flight event processing drain before halting.
    #[display("graceful")]
    Graceful,
    /// Graceful, plus: clear the persisted strategy state (disabling resume) and dispatch a
    /// follow-up job closing all open positions.
    #[display("graceful_close")]
    GracefulClose,
}
