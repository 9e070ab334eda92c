use chrono::{DateTime, Utc};
use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;

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

/// Redis-backed lifecycle store used in production.
///
/// Records are JSON values; append-only children live in lists (`RPUSH`/`LRANGE`), which
/// makes the `since_sequence` cursor a plain range read. Id and execution-number allocation
/// use atomic `INCR` counters, preserving the dense-monotone numbering the row-locked
/// original guaranteed. Task status transitions run under `WATCH`/`MULTI` so concurrent
/// control-plane requests cannot both win.
#[derive(Debug, Clone)]
pub struct RedisLifecycleStore {
    client: redis::Client,
    prefix: String,
}

impl RedisLifecycleStore {
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        redis::Client::open(url)
            .map(|client| Self {
                client,
                prefix: prefix.into(),
            })
            .map_err(transport)
    }

    fn conn(&self) -> Result<redis::Connection, StoreError> {
        self.client.get_connection().map_err(transport)
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn next_id(&self, conn: &mut redis::Connection, counter: &str) -> Result<u64, StoreError> {
        conn.incr(self.key(counter), 1u64).map_err(transport)
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        conn: &mut redis::Connection,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = conn.get(key).map_err(transport)?;
        raw.map(|json| serde_json::from_str(&json).map_err(codec))
            .transpose()
    }

    fn write_json<T: Serialize>(
        &self,
        conn: &mut redis::Connection,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(codec)?;
        conn.set(key, json).map_err(transport)
    }

    fn task_key(&self, task: TaskRef) -> String {
        self.key(&format!("task:{}:{}", task.task_type, task.task_id))
    }

    fn execution_key(&self, id: ExecutionId) -> String {
        self.key(&format!("exec:{id}"))
    }

    fn load_execution(
        &self,
        conn: &mut redis::Connection,
        id: ExecutionId,
    ) -> Result<Execution, StoreError> {
        self.read_json::<Execution>(conn, &self.execution_key(id))?
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))
    }

    fn store_execution(
        &self,
        conn: &mut redis::Connection,
        execution: &Execution,
    ) -> Result<(), StoreError> {
        self.write_json(conn, &self.execution_key(execution.id), execution)
    }

    fn append_child<T: Serialize>(
        &self,
        conn: &mut redis::Connection,
        id: ExecutionId,
        kind: &str,
        assign: impl FnOnce(Sequence) -> T,
    ) -> Result<Sequence, StoreError> {
        // Single live writer per execution, so LLEN followed by RPUSH cannot interleave.
        let key = self.key(&format!("exec:{id}:{kind}"));
        let length: u64 = conn.llen(&key).map_err(transport)?;
        let sequence = Sequence(length + 1);

        let record = assign(sequence);
        let json = serde_json::to_string(&record).map_err(codec)?;
        let _: () = conn.rpush(&key, json).map_err(transport)?;
        Ok(sequence)
    }

    fn read_children<T: DeserializeOwned>(
        &self,
        id: ExecutionId,
        kind: &str,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<T>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let key = self.key(&format!("exec:{id}:{kind}"));
        let start = since.value() as isize;
        let stop = start + limit as isize - 1;

        let raw: Vec<String> = conn.lrange(&key, start, stop).map_err(transport)?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(codec))
            .collect()
    }

    fn load_tasks(
        &self,
        conn: &mut redis::Connection,
        task_type: TaskType,
    ) -> Result<Vec<Task>, StoreError> {
        let ids: Vec<u64> = conn
            .lrange(self.key(&format!("tasks:{task_type}")), 0, -1)
            .map_err(transport)?;

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            let task_ref = TaskRef::new(task_type, TaskId(id));
            if let Some(task) = self.read_json::<Task>(conn, &self.task_key(task_ref))? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

impl LifecycleStore for RedisLifecycleStore {
    fn insert_config(&self, mut config: StrategyConfig) -> Result<StrategyConfig, StoreError> {
        let mut conn = self.conn()?;
        config.id = ConfigId(self.next_id(&mut conn, "seq:config")?);
        self.write_json(&mut conn, &self.key(&format!("config:{}", config.id)), &config)?;
        Ok(config)
    }

    fn config(&self, id: ConfigId) -> Result<Option<StrategyConfig>, StoreError> {
        let mut conn = self.conn()?;
        self.read_json(&mut conn, &self.key(&format!("config:{id}")))
    }

    fn delete_config(&self, id: ConfigId) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let removed: u64 = conn
            .del(self.key(&format!("config:{id}")))
            .map_err(transport)?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("strategy config {id}")));
        }
        Ok(())
    }

    fn insert_account(&self, mut account: Account) -> Result<Account, StoreError> {
        let mut conn = self.conn()?;
        account.id = AccountId(self.next_id(&mut conn, "seq:account")?);
        self.write_json(
            &mut conn,
            &self.key(&format!("account:{}", account.id)),
            &account,
        )?;
        Ok(account)
    }

    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let mut conn = self.conn()?;
        self.read_json(&mut conn, &self.key(&format!("account:{id}")))
    }

    fn insert_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut conn = self.conn()?;
        let task_type = task.task_ref().task_type;

        let id = TaskId(self.next_id(&mut conn, "seq:task")?);
        match &mut task {
            Task::Trading(trading) => trading.id = id,
            Task::Backtest(backtest) => backtest.id = id,
        }

        // SET NX on the name key enforces unique (owner, name) per task type.
        let name_key = self.key(&format!(
            "taskname:{task_type}:{}:{}",
            task.owner(),
            task.name()
        ));
        let claimed: bool = conn.set_nx(&name_key, id.0).map_err(transport)?;
        if !claimed {
            return Err(StoreError::Duplicate(format!(
                "{task_type} task named '{}' already exists for this user",
                task.name()
            )));
        }

        self.write_json(&mut conn, &self.task_key(task.task_ref()), &task)?;
        let _: () = conn
            .rpush(self.key(&format!("tasks:{task_type}")), id.0)
            .map_err(transport)?;
        Ok(task)
    }

    fn task(&self, task: TaskRef) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn()?;
        self.read_json(&mut conn, &self.task_key(task))
    }

    fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let key = self.task_key(task.task_ref());
        if self.read_json::<Task>(&mut conn, &key)?.is_none() {
            return Err(StoreError::NotFound(format!("task {}", task.task_ref())));
        }
        self.write_json(&mut conn, &key, task)
    }

    fn tasks(&self, task_type: TaskType) -> Result<Vec<Task>, StoreError> {
        let mut conn = self.conn()?;
        self.load_tasks(&mut conn, task_type)
    }

    fn trading_tasks_for_account(
        &self,
        account: AccountId,
    ) -> Result<Vec<TradingTask>, StoreError> {
        let mut conn = self.conn()?;
        Ok(self
            .load_tasks(&mut conn, TaskType::Trading)?
            .into_iter()
            .filter_map(|task| match task {
                Task::Trading(trading) if trading.account_id == account => Some(trading),
                _ => None,
            })
            .collect())
    }

    fn tasks_referencing_config(&self, id: ConfigId) -> Result<Vec<Task>, StoreError> {
        let mut conn = self.conn()?;
        let mut tasks = self.load_tasks(&mut conn, TaskType::Trading)?;
        tasks.extend(self.load_tasks(&mut conn, TaskType::Backtest)?);
        tasks.retain(|task| task.config_id() == id);
        Ok(tasks)
    }

    fn compare_and_set_status(
        &self,
        task: TaskRef,
        from: &[TaskStatus],
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let mut conn = self.conn()?;
        let key = self.task_key(task);

        // WATCH/MULTI optimistic transaction: retry when a concurrent writer touched the key.
        loop {
            redis::cmd("WATCH")
                .arg(&key)
                .query::<()>(&mut conn)
                .map_err(transport)?;

            let current = match self.read_json::<Task>(&mut conn, &key)? {
                Some(task) => task,
                None => {
                    let _: Result<(), _> = redis::cmd("UNWATCH").query(&mut conn);
                    return Err(StoreError::NotFound(format!("task {task}")));
                }
            };

            let status = current.status();
            if !from.contains(&status) {
                let _: Result<(), _> = redis::cmd("UNWATCH").query(&mut conn);
                return Err(StoreError::Conflict(format!(
                    "task {task} is {status}, expected one of {from:?}"
                )));
            }

            let mut updated = current;
            updated.set_status(to, now);
            let json = serde_json::to_string(&updated).map_err(codec)?;

            let mut pipe = redis::pipe();
            pipe.atomic().set(&key, json).ignore();
            match pipe
                .query::<Option<()>>(&mut conn)
                .map_err(transport)?
            {
                Some(()) => return Ok(updated),
                // Aborted by a concurrent write; re-read and re-check.
                None => continue,
            }
        }
    }

    fn update_strategy_state(
        &self,
        task: TaskRef,
        state: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let key = self.task_key(task);
        let current = self
            .read_json::<Task>(&mut conn, &key)?
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;

        match current {
            Task::Trading(mut trading) => {
                trading.strategy_state = state.clone();
                trading.updated_at = now;
                self.write_json(&mut conn, &key, &Task::Trading(trading))
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
        let mut conn = self.conn()?;

        let id = ExecutionId(self.next_id(&mut conn, "seq:exec")?);
        let execution_number: u64 = conn
            .incr(
                self.key(&format!("execno:{}:{}", task.task_type, task.task_id)),
                1u64,
            )
            .map_err(transport)?;

        let execution = Execution {
            id,
            task_type: task.task_type,
            task_id: task.task_id,
            execution_number: execution_number as u32,
            status: ExecutionStatus::Running,
            progress: 0,
            started_at: now,
            completed_at: None,
            error_message: None,
            error_traceback: None,
            logs: Vec::new(),
        };

        self.store_execution(&mut conn, &execution)?;
        let _: () = conn
            .rpush(
                self.key(&format!("execs:{}:{}", task.task_type, task.task_id)),
                id.0,
            )
            .map_err(transport)?;
        Ok(execution)
    }

    fn execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        let mut conn = self.conn()?;
        self.read_json(&mut conn, &self.execution_key(id))
    }

    fn latest_execution(&self, task: TaskRef) -> Result<Option<Execution>, StoreError> {
        let mut conn = self.conn()?;
        let ids: Vec<u64> = conn
            .lrange(
                self.key(&format!("execs:{}:{}", task.task_type, task.task_id)),
                -1,
                -1,
            )
            .map_err(transport)?;

        match ids.first() {
            Some(id) => self.read_json(&mut conn, &self.execution_key(ExecutionId(*id))),
            None => Ok(None),
        }
    }

    fn executions(&self, task: TaskRef) -> Result<Vec<Execution>, StoreError> {
        let mut conn = self.conn()?;
        let ids: Vec<u64> = conn
            .lrange(
                self.key(&format!("execs:{}:{}", task.task_type, task.task_id)),
                0,
                -1,
            )
            .map_err(transport)?;

        let mut executions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(execution) =
                self.read_json::<Execution>(&mut conn, &self.execution_key(ExecutionId(id)))?
            {
                executions.push(execution);
            }
        }
        Ok(executions)
    }

    fn mark_execution_running(
        &self,
        id: ExecutionId,
        _now: DateTime<Utc>,
    ) -> Result<Execution, StoreError> {
        let mut conn = self.conn()?;
        let mut execution = self.load_execution(&mut conn, id)?;

        if execution.status != ExecutionStatus::Running || execution.progress != 0 {
            execution.status = ExecutionStatus::Running;
            execution.progress = 0;
            self.store_execution(&mut conn, &execution)?;
        }
        Ok(execution)
    }

    fn update_execution_progress(
        &self,
        id: ExecutionId,
        progress: u8,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let mut execution = self.load_execution(&mut conn, id)?;
        execution.progress = progress.min(100);
        self.store_execution(&mut conn, &execution)
    }

    fn append_execution_log(
        &self,
        id: ExecutionId,
        level: LogLevel,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let mut execution = self.load_execution(&mut conn, id)?;
        execution.push_log(level, message, now);
        self.store_execution(&mut conn, &execution)
    }

    fn finalize_execution(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        error: Option<ExecutionError>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let mut execution = self.load_execution(&mut conn, id)?;

        if execution.status.is_terminal() {
            return Ok(());
        }

        execution.status = status;
        execution.completed_at = Some(now);
        if let Some(error) = error {
            execution.error_message = Some(error.message);
            execution.error_traceback = Some(error.traceback);
        }
        self.store_execution(&mut conn, &execution)
    }

    fn append_event(&self, id: ExecutionId, event: StrategyEvent) -> Result<Sequence, StoreError> {
        let mut conn = self.conn()?;
        self.append_child(&mut conn, id, "events", |sequence| {
            StrategyEventRecord::new(sequence, event)
        })
    }

    fn append_trade(
        &self,
        id: ExecutionId,
        mut trade: TradeLogEntry,
    ) -> Result<Sequence, StoreError> {
        let mut conn = self.conn()?;
        self.append_child(&mut conn, id, "trades", |sequence| {
            trade.sequence = sequence;
            trade
        })
    }

    fn append_equity_point(
        &self,
        id: ExecutionId,
        mut point: EquityPoint,
    ) -> Result<Sequence, StoreError> {
        let mut conn = self.conn()?;
        self.append_child(&mut conn, id, "equity", |sequence| {
            point.sequence = sequence;
            point
        })
    }

    fn events_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<StrategyEventRecord>, StoreError> {
        self.read_children(id, "events", since, limit)
    }

    fn trades_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<TradeLogEntry>, StoreError> {
        self.read_children(id, "trades", since, limit)
    }

    fn equity_since(
        &self,
        id: ExecutionId,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<EquityPoint>, StoreError> {
        self.read_children(id, "equity", since, limit)
    }

    fn write_metrics_checkpoint(
        &self,
        id: ExecutionId,
        checkpoint: MetricsCheckpoint,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let json = serde_json::to_string(&checkpoint).map_err(codec)?;
        conn.rpush(self.key(&format!("exec:{id}:checkpoints")), json)
            .map_err(transport)
    }

    fn metrics_checkpoints(
        &self,
        id: ExecutionId,
    ) -> Result<Vec<MetricsCheckpoint>, StoreError> {
        let mut conn = self.conn()?;
        let raw: Vec<String> = conn
            .lrange(self.key(&format!("exec:{id}:checkpoints")), 0, -1)
            .map_err(transport)?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(codec))
            .collect()
    }

    fn write_final_metrics(
        &self,
        id: ExecutionId,
        metrics: ExecutionMetrics,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let json = serde_json::to_string(&metrics).map_err(codec)?;
        let claimed: bool = conn
            .set_nx(self.key(&format!("exec:{id}:metrics")), json)
            .map_err(transport)?;
        if !claimed {
            return Err(StoreError::Immutable(format!(
                "final metrics for execution {id} already written"
            )));
        }
        Ok(())
    }

    fn final_metrics(&self, id: ExecutionId) -> Result<Option<ExecutionMetrics>, StoreError> {
        let mut conn = self.conn()?;
        self.read_json(&mut conn, &self.key(&format!("exec:{id}:metrics")))
    }
}

fn transport(err: redis::RedisError) -> StoreError {
    StoreError::Transport(err.to_string())
}

fn codec(err: serde_json::Error) -> StoreError {
    StoreError::Codec(err.to_string())
}
