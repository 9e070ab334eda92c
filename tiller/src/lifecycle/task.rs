use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use super::{AccountId, ConfigId, TaskId, TaskRef, TaskStatus, TaskType, UserId};

/// Reusable strategy configuration: a registered strategy type plus its parameters.
///
/// Immutable while any task in `RUNNING`/`PAUSED` references it (deletion is refused).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub id: ConfigId,
    pub owner: UserId,
    pub name: String,
    pub strategy_type: SmolStr,
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
}

/// Brokerage account a trading task executes against.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub name: String,
    pub balance: Decimal,
    pub active: bool,
}

/// Persistent live trading task.
///
/// At most one trading task per account is in `RUNNING` at any time.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradingTask {
    pub id: TaskId,
    pub owner: UserId,
    pub name: String,
    pub config_id: ConfigId,
    pub account_id: AccountId,
    pub status: TaskStatus,
    /// Strategy-owned checkpoint persisted across executions so `resume` can continue from
    /// the last saved point. Opaque to the platform.
    pub strategy_state: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradingTask {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(TaskType::Trading, self.id)
    }

    pub fn has_strategy_state(&self) -> bool {
        match &self.strategy_state {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Whether a stopped/failed task has enough state to resume.
    pub fn can_resume(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Stopped | TaskStatus::Failed | TaskStatus::Created
        ) && self.has_strategy_state()
    }
}

/// Persistent backtest task: a bounded historical replay over `[start_time, end_time]`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BacktestTask {
    pub id: TaskId,
    pub owner: UserId,
    pub name: String,
    pub config_id: ConfigId,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub initial_balance: Decimal,
    pub data_source: SmolStr,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BacktestTask {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(TaskType::Backtest, self.id)
    }
}

/// A task of either variant.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "task_type", rename_all = "lowercase")]
pub enum Task {
    Trading(TradingTask),
    Backtest(BacktestTask),
}

impl Task {
    pub fn task_ref(&self) -> TaskRef {
        match self {
            Self::Trading(task) => task.task_ref(),
            Self::Backtest(task) => task.task_ref(),
        }
    }

    pub fn id(&self) -> TaskId {
        match self {
            Self::Trading(task) => task.id,
            Self::Backtest(task) => task.id,
        }
    }

    pub fn owner(&self) -> UserId {
        match self {
            Self::Trading(task) => task.owner,
            Self::Backtest(task) => task.owner,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Trading(task) => &task.name,
            Self::Backtest(task) => &task.name,
        }
    }

    pub fn config_id(&self) -> ConfigId {
        match self {
            Self::Trading(task) => task.config_id,
            Self::Backtest(task) => task.config_id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Trading(task) => task.status,
            Self::Backtest(task) => task.status,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        match self {
            Self::Trading(task) => {
                task.status = status;
                task.updated_at = now;
            }
            Self::Backtest(task) => {
                task.status = status;
                task.updated_at = now;
            }
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Trading(task) => task.updated_at,
            Self::Backtest(task) => task.updated_at,
        }
    }

    pub fn as_trading(&self) -> Option<&TradingTask> {
        match self {
            Self::Trading(task) => Some(task),
            Self::Backtest(_) => None,
        }
    }

    pub fn as_backtest(&self) -> Option<&BacktestTask> {
        match self {
            Self::Backtest(task) => Some(task),
            Self::Trading(_) => None,
        }
    }
}
