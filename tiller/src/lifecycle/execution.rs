use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{ExecutionId, ExecutionStatus, TaskId, TaskRef, TaskType};
use crate::Sequence;
use crate::statistic::ExecutionMetrics;
use crate::strategy::event::StrategyEvent;

/// Executions retain at most this many of their most recent log lines.
pub const EXECUTION_LOG_CAP: usize = 1_000;

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[display("INFO")]
    Info,
    #[display("WARNING")]
    Warning,
    #[display("ERROR")]
    Error,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct LogLine {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// One attempt to run a task.
///
/// `execution_number` is strictly monotone per task. Once the status is terminal the record
/// is immutable apart from its append-only children.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_type: TaskType,
    pub task_id: TaskId,
    pub execution_number: u32,
    pub status: ExecutionStatus,
    /// Percentage in `[0, 100]`, monotone non-decreasing within the execution.
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub logs: Vec<LogLine>,
}

impl Execution {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(self.task_type, self.task_id)
    }

    /// Append a log line, evicting the oldest once the cap is reached.
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>, now: DateTime<Utc>) {
        if self.logs.len() >= EXECUTION_LOG_CAP {
            let excess = self.logs.len() + 1 - EXECUTION_LOG_CAP;
            self.logs.drain(..excess);
        }
        self.logs.push(LogLine::new(now, level, message.into()));
    }
}

/// Failure details persisted on a failed execution.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ExecutionError {
    pub message: String,
    pub traceback: String,
}

/// Append-only strategy-event child of an execution.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct StrategyEventRecord {
    pub sequence: Sequence,
    pub event: StrategyEvent,
}

/// A completed trade extracted from the strategy event stream.
///
/// The `sequence` is assigned by the store at append time.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct TradeLogEntry {
    #[serde(default)]
    pub sequence: Sequence,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub instrument: Option<SmolStr>,
    pub direction: Option<SmolStr>,
    pub units: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub pnl: Decimal,
    pub pips: Option<Decimal>,
    pub reason: Option<String>,
}

/// Running-balance point appended whenever a trade completes.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct EquityPoint {
    #[serde(default)]
    pub sequence: Sequence,
    pub timestamp: Option<DateTime<Utc>>,
    pub balance: Decimal,
}

/// Periodic immutable snapshot of the aggregated metrics of an execution in flight.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct MetricsCheckpoint {
    pub created_at: DateTime<Utc>,
    pub processed: u64,
    pub metrics: ExecutionMetrics,
}
