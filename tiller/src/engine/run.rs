use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use smol_str::SmolStr;
use std::time::{Duration, Instant};
use tiller_integration::bus::{BusMessage, BusSubscription, Tick};
use tiller_integration::lock::{AcquireOutcome, LockStatus, acquire_or_takeover};
use tracing::{info, warn};

use super::progress::{ProgressEstimator, ProgressTracker};
use super::signals::{ControlAction, ControlSignals, StopSource};
use super::{BacktestTickRequest, Worker, WorkerContext};
use crate::Sequence;
use crate::error::TillerError;
use crate::lifecycle::execution::{EquityPoint, ExecutionError, LogLevel, MetricsCheckpoint};
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::task::Task;
use crate::lifecycle::{ExecutionId, ExecutionStatus, TaskRef, TaskStatus, TaskType};
use crate::statistic::ExecutionMetrics;
use crate::strategy::Strategy;

/// Bus receive timeout; bounds how long cancellation can go unobserved.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Cadence of the waiting-for-ticks warning while a backtest replay is idle.
const IDLE_WARN_INTERVAL: Duration = Duration::from_secs(30);

/// Why the main loop ended.
#[derive(Debug, Clone, Eq, PartialEq)]
enum LoopOutcome {
    Stopped(StopSource),
    Eof { published_total: u64 },
    ProducerStopped(Option<String>),
    ProducerError(Option<String>),
}

/// Drive one execution of `task_ref` to termination.
///
/// Uses the dispatcher-supplied execution when given; allocates a fresh one otherwise (the
/// enqueue may have raced past creation). Returns the error after finalizing when the
/// execution fails, so the pool host sees the failure.
pub(crate) fn run_execution(
    worker: &Worker,
    task_ref: TaskRef,
    execution_id: Option<ExecutionId>,
) -> Result<(), TillerError> {
    let task_name = task_ref.task_type.task_name();
    let instance_key = task_ref.instance_key();
    let meta = json!({ "kind": task_name, "task_id": task_ref.task_id.0 });

    match acquire_or_takeover(
        worker.locks.as_ref(),
        task_name,
        &instance_key,
        &worker.worker_id,
        meta,
        worker.config.stale_threshold(),
    )? {
        AcquireOutcome::Acquired => {}
        AcquireOutcome::Held(holder) => {
            info!(
                task = %task_ref,
                holder = %holder.worker_id,
                "task already running; refusing duplicate start"
            );
            return Ok(());
        }
        AcquireOutcome::Stale(holder) => {
            // The takeover retry also found a stale record: another worker is mid-recovery.
            warn!(
                task = %task_ref,
                holder = %holder.worker_id,
                "lock still stale after takeover attempt; leaving it to the other worker"
            );
            return Ok(());
        }
    }

    let Some(task) = worker.store.task(task_ref)? else {
        warn!(task = %task_ref, "task not found; releasing lock");
        worker.locks.release(
            task_name,
            &instance_key,
            LockStatus::Failed,
            Some("Task not found".to_string()),
        )?;
        return Ok(());
    };

    let execution = match execution_id {
        Some(id) => match worker.store.mark_execution_running(id, Utc::now()) {
            Ok(execution) => execution,
            Err(err) => {
                warn!(task = %task_ref, %id, %err, "claiming execution failed; allocating fresh");
                worker.store.allocate_execution(task_ref, Utc::now())?
            }
        },
        None => worker.store.allocate_execution(task_ref, Utc::now())?,
    };
    let ctx = WorkerContext::new(worker.worker_id.clone(), task_ref, execution.id);

    match run_claimed(worker, &ctx, &task) {
        Ok(()) => Ok(()),
        Err(err) => {
            fail_execution(worker, &ctx, &err);
            Err(err)
        }
    }
}

fn run_claimed(worker: &Worker, ctx: &WorkerContext, task: &Task) -> Result<(), TillerError> {
    let banner = match ctx.task.task_type {
        TaskType::Trading => "=== Trading execution started ===",
        TaskType::Backtest => "=== Backtest execution started ===",
    };
    worker
        .store
        .append_execution_log(ctx.execution_id, LogLevel::Info, banner, Utc::now())?;

    let config = worker.store.config(task.config_id())?.ok_or_else(|| {
        TillerError::execution(format!("strategy config {} not found", task.config_id()))
    })?;
    let strategy = worker
        .registry
        .create(&config.strategy_type, &config.parameters)?;

    let (initial_state, initial_balance) = match task {
        Task::Trading(trading) => {
            let balance = worker
                .store
                .account(trading.account_id)?
                .map(|account| account.balance)
                .unwrap_or(Decimal::ZERO);
            (trading.strategy_state.clone(), balance)
        }
        Task::Backtest(backtest) => (Value::Object(Map::new()), backtest.initial_balance),
    };

    let mut session = ExecutionSession {
        worker,
        ctx: ctx.clone(),
        strategy,
        state: initial_state,
        initial_balance,
        balance: initial_balance,
        trade_log: Vec::new(),
        realized_pips: Decimal::ZERO,
        processed: 0,
        last_tick_ts: None,
        ticks_missing_mid: 0,
        stop_invoked: false,
    };
    session.seed_equity()?;
    session.invoke_start()?;

    let mut signals = ControlSignals::new(
        worker.locks.as_ref(),
        worker.store.as_ref(),
        ctx.task,
        task.status(),
        worker.config.status_poll_interval(),
    );
    let mut heartbeater = Heartbeater::new(worker, ctx.task);

    let outcome = match task {
        Task::Trading(_) => {
            let mut subscription = worker.bus.subscribe(&worker.config.tick_channel)?;
            session.log(
                LogLevel::Info,
                format!("Subscribed to tick channel: {}", worker.config.tick_channel),
            )?;
            run_trading_loop(
                &mut session,
                &mut signals,
                &mut heartbeater,
                subscription.as_mut(),
            )?
        }
        Task::Backtest(backtest) => {
            let request_id = format!(
                "backtest:{}:{}:{:08x}",
                backtest.id,
                Utc::now().timestamp(),
                rand::random::<u32>()
            );
            let channel = worker.config.backtest_channel(&request_id);

            // Subscribe before triggering the producer. Pub/sub has no replay: a producer
            // that starts first can race past the initial ticks and the EOF marker.
            let mut subscription = worker.bus.subscribe(&channel)?;
            session.log(LogLevel::Info, format!("Subscribed to tick channel: {channel}"))?;

            let instrument = config
                .parameters
                .get("instrument")
                .and_then(Value::as_str)
                .unwrap_or_default();
            worker
                .source
                .publish_ticks_for_backtest(BacktestTickRequest::new(
                    SmolStr::new(instrument),
                    backtest.start_time,
                    backtest.end_time,
                    request_id.clone(),
                    channel.clone(),
                ))?;
            session.log(
                LogLevel::Info,
                format!("Requested tick replay (request_id={request_id})"),
            )?;

            let mut progress = ProgressTracker::new(ProgressEstimator::for_backtest(
                backtest.start_time,
                backtest.end_time,
            ));
            let outcome = run_backtest_loop(
                &mut session,
                &mut signals,
                &mut heartbeater,
                subscription.as_mut(),
                &mut progress,
            )?;

            if matches!(outcome, LoopOutcome::Eof { .. }) {
                progress.complete(worker.store.as_ref(), ctx.execution_id);
            }
            outcome
        }
    };

    finish(worker, ctx, session, outcome)
}

fn run_trading_loop(
    session: &mut ExecutionSession<'_>,
    signals: &mut ControlSignals<'_>,
    heartbeater: &mut Heartbeater<'_>,
    subscription: &mut dyn BusSubscription,
) -> Result<LoopOutcome, TillerError> {
    let checkpoint_interval = session
        .worker
        .config
        .progress_interval_ticks(TaskType::Trading);

    loop {
        match signals.poll()? {
            ControlAction::Stop(source) => {
                session.log_stop_source(source)?;
                session.invoke_stop()?;
                return Ok(LoopOutcome::Stopped(source));
            }
            ControlAction::Pause => session.invoke_pause()?,
            ControlAction::Resume => session.invoke_resume()?,
            ControlAction::Continue => {}
        }

        let Some(message) = subscription.recv(RECV_TIMEOUT)? else {
            if session.idle_heartbeat(heartbeater, None) == HeartbeatOutcome::Lost {
                session.invoke_stop()?;
                return Ok(LoopOutcome::Stopped(StopSource::LockLost));
            }
            continue;
        };

        // Backtest control records never appear on the live channel; drop anything that is
        // not a tick.
        let BusMessage::Tick(tick) = message else {
            continue;
        };

        session.process_tick(&tick)?;

        if session.processed % checkpoint_interval == 0 {
            session.persist_strategy_state()?;
            session.write_checkpoint();
            if heartbeater.force_beat(session.heartbeat_message(), session.heartbeat_meta(None))
                == HeartbeatOutcome::Lost
            {
                session.log(LogLevel::Warning, "Worker lock lost; stopping")?;
                session.invoke_stop()?;
                return Ok(LoopOutcome::Stopped(StopSource::LockLost));
            }
        }
    }
}

fn run_backtest_loop(
    session: &mut ExecutionSession<'_>,
    signals: &mut ControlSignals<'_>,
    heartbeater: &mut Heartbeater<'_>,
    subscription: &mut dyn BusSubscription,
    progress: &mut ProgressTracker,
) -> Result<LoopOutcome, TillerError> {
    let checkpoint_interval = session
        .worker
        .config
        .progress_interval_ticks(TaskType::Backtest);
    let mut first_tick_seen = false;
    let mut next_idle_warn = Instant::now() + IDLE_WARN_INTERVAL;

    loop {
        // Backtests have no pause; only stop signals matter here.
        if let ControlAction::Stop(source) = signals.poll()? {
            session.log_stop_source(source)?;
            session.invoke_stop()?;
            return Ok(LoopOutcome::Stopped(source));
        }

        let Some(message) = subscription.recv(RECV_TIMEOUT)? else {
            progress.maybe_persist(
                session.worker.store.as_ref(),
                session.ctx.execution_id,
                session.processed,
                session.last_tick_ts,
                false,
            );
            let now = Instant::now();
            if now >= next_idle_warn {
                warn!(
                    task = %session.ctx.task,
                    processed = session.processed,
                    last_tick = ?session.last_tick_ts,
                    "waiting for backtest ticks"
                );
                next_idle_warn = now + IDLE_WARN_INTERVAL;
            }
            if session.idle_heartbeat(heartbeater, progress.last_persisted())
                == HeartbeatOutcome::Lost
            {
                session.invoke_stop()?;
                return Ok(LoopOutcome::Stopped(StopSource::LockLost));
            }
            continue;
        };
        next_idle_warn = Instant::now() + IDLE_WARN_INTERVAL;

        match message {
            BusMessage::Tick(tick) => {
                if !first_tick_seen && let Some(ts) = tick.timestamp {
                    first_tick_seen = true;
                    session.log(
                        LogLevel::Info,
                        format!("First tick received: {}", ts.to_rfc3339()),
                    )?;
                }

                session.process_tick(&tick)?;

                if session.processed % checkpoint_interval == 0 {
                    progress.maybe_persist(
                        session.worker.store.as_ref(),
                        session.ctx.execution_id,
                        session.processed,
                        session.last_tick_ts,
                        true,
                    );
                    session.write_checkpoint();
                    if heartbeater.force_beat(
                        session.heartbeat_message(),
                        session.heartbeat_meta(progress.last_persisted()),
                    ) == HeartbeatOutcome::Lost
                    {
                        session.log(LogLevel::Warning, "Worker lock lost; stopping")?;
                        session.invoke_stop()?;
                        return Ok(LoopOutcome::Stopped(StopSource::LockLost));
                    }
                }
            }
            BusMessage::Eof { count } => {
                let published_total = count.unwrap_or(session.processed);
                progress.set_total(published_total);
                session.log(
                    LogLevel::Info,
                    format!(
                        "EOF received: processed={} published_total={published_total}",
                        session.processed
                    ),
                )?;
                session.log_backtest_summary()?;
                return Ok(LoopOutcome::Eof { published_total });
            }
            BusMessage::Stopped { message } => {
                session.log(
                    LogLevel::Warning,
                    format!(
                        "Terminal message received: type=stopped message={}",
                        message.as_deref().unwrap_or("")
                    ),
                )?;
                return Ok(LoopOutcome::ProducerStopped(message));
            }
            BusMessage::Error { message } => {
                session.log(
                    LogLevel::Warning,
                    format!(
                        "Terminal message received: type=error message={}",
                        message.as_deref().unwrap_or("")
                    ),
                )?;
                return Ok(LoopOutcome::ProducerError(message));
            }
        }
    }
}

/// Shutdown sequence shared by every clean loop exit.
fn finish(
    worker: &Worker,
    ctx: &WorkerContext,
    mut session: ExecutionSession<'_>,
    outcome: LoopOutcome,
) -> Result<(), TillerError> {
    session.invoke_stop()?;

    // A graceful_close stop discards the checkpoint at the control plane; the final persist
    // must not resurrect it (resume stays disabled).
    let state_discarded = worker
        .locks
        .info(ctx.task.task_type.task_name(), &ctx.task.instance_key())?
        .and_then(|info| info.status_message)
        .is_some_and(|message| message.contains("graceful_close"));
    if !state_discarded {
        session.persist_strategy_state()?;
    }

    let metrics = ExecutionMetrics::calculate(&session.trade_log, session.initial_balance);
    if let Err(err) = worker.store.write_final_metrics(ctx.execution_id, metrics) {
        // Losing the final metrics snapshot must not fail an otherwise-clean shutdown.
        warn!(task = %ctx.task, execution_id = %ctx.execution_id, %err, "final metrics write failed");
    }

    let (execution_status, task_status, lock_status, error) = match outcome {
        LoopOutcome::Stopped(_) | LoopOutcome::ProducerStopped(_) => (
            ExecutionStatus::Stopped,
            TaskStatus::Stopped,
            LockStatus::Stopped,
            None,
        ),
        LoopOutcome::Eof { .. } => (
            ExecutionStatus::Completed,
            TaskStatus::Completed,
            LockStatus::Completed,
            None,
        ),
        LoopOutcome::ProducerError(message) => {
            let message =
                message.unwrap_or_else(|| "tick producer reported an error".to_string());
            (
                ExecutionStatus::Failed,
                TaskStatus::Failed,
                LockStatus::Failed,
                Some(ExecutionError::new(message, String::new())),
            )
        }
    };

    session.log(
        LogLevel::Info,
        format!(
            "Execution finished: status={execution_status} processed={}",
            session.processed
        ),
    )?;
    worker.store.finalize_execution(
        ctx.execution_id,
        execution_status,
        error,
        Utc::now(),
    )?;

    if let Some(mut task) = worker.store.task(ctx.task)?
        && task.status() != task_status
    {
        task.set_status(task_status, Utc::now());
        worker.store.update_task(&task)?;
    }

    worker.locks.release(
        ctx.task.task_type.task_name(),
        &ctx.task.instance_key(),
        lock_status,
        Some(format!("processed={}", session.processed)),
    )?;

    info!(
        task = %ctx.task,
        execution_id = %ctx.execution_id,
        status = %execution_status,
        processed = session.processed,
        trades = session.trade_log.len(),
        "execution finished"
    );
    Ok(())
}

/// Failure path: record the error, finalize as FAILED, flip the task, release the lock.
///
/// All writes are best-effort; the original error is what propagates to the pool host.
fn fail_execution(worker: &Worker, ctx: &WorkerContext, err: &TillerError) {
    let now = Utc::now();
    let _ = worker.store.append_execution_log(
        ctx.execution_id,
        LogLevel::Error,
        &err.to_string(),
        now,
    );
    let _ = worker.store.finalize_execution(
        ctx.execution_id,
        ExecutionStatus::Failed,
        Some(ExecutionError::new(err.to_string(), format!("{err:?}"))),
        now,
    );
    if let Ok(Some(mut task)) = worker.store.task(ctx.task) {
        task.set_status(TaskStatus::Failed, now);
        let _ = worker.store.update_task(&task);
    }
    let _ = worker.locks.release(
        ctx.task.task_type.task_name(),
        &ctx.task.instance_key(),
        LockStatus::Failed,
        Some(err.to_string()),
    );
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum HeartbeatOutcome {
    Sent,
    Skipped,
    Lost,
}

/// Rate-limited heartbeat writer for the worker's lock record.
struct Heartbeater<'a> {
    worker: &'a Worker,
    task: TaskRef,
    last: Option<Instant>,
}

impl<'a> Heartbeater<'a> {
    fn new(worker: &'a Worker, task: TaskRef) -> Self {
        Self {
            worker,
            task,
            last: None,
        }
    }

    fn beat(&mut self, message: String, meta: Value) -> HeartbeatOutcome {
        if let Some(last) = self.last
            && last.elapsed() < self.worker.config.heartbeat_interval()
        {
            return HeartbeatOutcome::Skipped;
        }
        self.force_beat(message, meta)
    }

    fn force_beat(&mut self, message: String, meta: Value) -> HeartbeatOutcome {
        match self.worker.locks.heartbeat(
            self.task.task_type.task_name(),
            &self.task.instance_key(),
            &self.worker.worker_id,
            Some(message),
            Some(meta),
        ) {
            Ok(true) => {
                self.last = Some(Instant::now());
                HeartbeatOutcome::Sent
            }
            Ok(false) => HeartbeatOutcome::Lost,
            Err(err) => {
                // Heartbeat write jitter is survivable; staleness only sets in after the
                // threshold.
                warn!(task = %self.task, %err, "heartbeat write failed; continuing");
                self.last = Some(Instant::now());
                HeartbeatOutcome::Sent
            }
        }
    }
}

/// Mutable state of one running execution: the strategy, its opaque state, and the
/// accumulators feeding metrics, heartbeats and logs.
struct ExecutionSession<'a> {
    worker: &'a Worker,
    ctx: WorkerContext,
    strategy: Box<dyn Strategy>,
    state: Value,
    initial_balance: Decimal,
    balance: Decimal,
    trade_log: Vec<crate::lifecycle::execution::TradeLogEntry>,
    realized_pips: Decimal,
    processed: u64,
    last_tick_ts: Option<DateTime<Utc>>,
    ticks_missing_mid: u64,
    stop_invoked: bool,
}

impl ExecutionSession<'_> {
    fn store(&self) -> &dyn LifecycleStore {
        self.worker.store.as_ref()
    }

    fn log(&self, level: LogLevel, message: impl AsRef<str>) -> Result<(), TillerError> {
        Ok(self.store().append_execution_log(
            self.ctx.execution_id,
            level,
            message.as_ref(),
            Utc::now(),
        )?)
    }

    /// Seed the equity stream with the starting balance.
    fn seed_equity(&self) -> Result<(), TillerError> {
        self.store().append_equity_point(
            self.ctx.execution_id,
            EquityPoint {
                sequence: Sequence::default(),
                timestamp: None,
                balance: self.initial_balance,
            },
        )?;
        Ok(())
    }

    fn invoke_start(&mut self) -> Result<(), TillerError> {
        let state = std::mem::take(&mut self.state);
        let (state, events) = self.strategy.on_start(state);
        self.state = state;
        self.record_events(events, None)
    }

    fn invoke_pause(&mut self) -> Result<(), TillerError> {
        self.log(LogLevel::Info, "Pause requested via task status")?;
        let state = std::mem::take(&mut self.state);
        let (state, events) = self.strategy.on_pause(state);
        self.state = state;
        self.record_events(events, None)
    }

    fn invoke_resume(&mut self) -> Result<(), TillerError> {
        self.log(LogLevel::Info, "Resume requested via task status")?;
        let state = std::mem::take(&mut self.state);
        let (state, events) = self.strategy.on_resume(state);
        self.state = state;
        self.record_events(events, None)
    }

    /// Invoke the strategy's stop callback exactly once per execution.
    fn invoke_stop(&mut self) -> Result<(), TillerError> {
        if self.stop_invoked {
            return Ok(());
        }
        self.stop_invoked = true;
        let state = std::mem::take(&mut self.state);
        let (state, events) = self.strategy.on_stop(state);
        self.state = state;
        self.record_events(events, None)
    }

    fn process_tick(&mut self, tick: &Tick) -> Result<(), TillerError> {
        if tick.mid.is_none() {
            self.ticks_missing_mid += 1;
        }

        let state = std::mem::take(&mut self.state);
        let (state, events) = self.strategy.on_tick(tick, state);
        self.state = state;
        self.record_events(events, Some(tick))?;

        self.processed += 1;
        if tick.timestamp.is_some() {
            self.last_tick_ts = tick.timestamp;
        }
        Ok(())
    }

    /// Persist a batch of strategy events: enrich, append to the event sink, extract trades
    /// into the trade and equity sinks, and log a human-readable summary line.
    ///
    /// Append failures here are fatal to the execution - losing recorded events would
    /// silently corrupt the metrics downstream.
    fn record_events(
        &mut self,
        events: Vec<crate::strategy::event::StrategyEvent>,
        tick: Option<&Tick>,
    ) -> Result<(), TillerError> {
        for event in events {
            let event = match tick {
                Some(tick) => event.enriched_from_tick(tick),
                None => event,
            };
            let summary = event.summary(tick.and_then(|tick| tick.timestamp));

            self.store().append_event(self.ctx.execution_id, event.clone())?;

            if let Some(trade) = event.to_trade() {
                self.balance += trade.pnl;
                self.store().append_trade(self.ctx.execution_id, trade.clone())?;
                self.store().append_equity_point(
                    self.ctx.execution_id,
                    EquityPoint {
                        sequence: Sequence::default(),
                        timestamp: trade.exit_time,
                        balance: self.balance,
                    },
                )?;
                self.trade_log.push(trade);
            }

            if event.is_close()
                && let Some(pips) = event.pips()
            {
                self.realized_pips += pips;
            }

            self.log(LogLevel::Info, &summary)?;
            info!(task = %self.ctx.task, kind = %event.kind, "strategy event");
        }
        Ok(())
    }

    /// Persist the opaque strategy checkpoint (trading tasks only).
    fn persist_strategy_state(&self) -> Result<(), TillerError> {
        if self.ctx.task.task_type == TaskType::Trading {
            self.store()
                .update_strategy_state(self.ctx.task, &self.state, Utc::now())?;
        }
        Ok(())
    }

    /// Write a metrics checkpoint. Failures are logged and swallowed: losing a checkpoint is
    /// preferable to losing the execution.
    fn write_checkpoint(&self) {
        let metrics = ExecutionMetrics::calculate(&self.trade_log, self.initial_balance);
        let checkpoint = MetricsCheckpoint::new(Utc::now(), self.processed, metrics);
        if let Err(err) = self
            .store()
            .write_metrics_checkpoint(self.ctx.execution_id, checkpoint)
        {
            warn!(
                task = %self.ctx.task,
                execution_id = %self.ctx.execution_id,
                %err,
                "metrics checkpoint write failed; continuing"
            );
        }
    }

    fn idle_heartbeat(
        &self,
        heartbeater: &mut Heartbeater<'_>,
        progress: Option<u8>,
    ) -> HeartbeatOutcome {
        let outcome = heartbeater.beat(self.heartbeat_message(), self.heartbeat_meta(progress));
        if outcome == HeartbeatOutcome::Lost {
            warn!(task = %self.ctx.task, "worker lock lost; stopping cleanly");
        }
        outcome
    }

    fn heartbeat_message(&self) -> String {
        match self.last_tick_ts {
            Some(ts) => format!("processed={} last_tick={}", self.processed, ts.to_rfc3339()),
            None => format!("processed={} last_tick=n/a", self.processed),
        }
    }

    fn heartbeat_meta(&self, progress: Option<u8>) -> Value {
        json!({
            "processed": self.processed,
            "last_tick": self.last_tick_ts.map(|ts| ts.to_rfc3339()),
            "realized_pips": self.realized_pips.to_string(),
            "progress": progress,
        })
    }

    fn log_stop_source(&self, source: StopSource) -> Result<(), TillerError> {
        let message = match source {
            StopSource::LockStopRequested => "Stop requested via worker lock",
            StopSource::TaskStopped => "Stop requested via task status",
            StopSource::LockLost => "Worker lock lost; stopping",
        };
        self.log(LogLevel::Info, message)
    }

    /// End-of-run diagnostics that explain "the strategy did nothing" cases.
    fn log_backtest_summary(&self) -> Result<(), TillerError> {
        self.log(
            LogLevel::Info,
            format!(
                "Backtest summary: processed={} trades={} realized_pips={} mid_missing={}",
                self.processed,
                self.trade_log.len(),
                self.realized_pips,
                self.ticks_missing_mid
            ),
        )?;
        if self.trade_log.is_empty() {
            self.log(
                LogLevel::Warning,
                "No trades produced. Common causes: not enough ticks for the strategy's \
                 warm-up, mid price missing or invalid, or thresholds too strict for the \
                 chosen window.",
            )?;
        }
        Ok(())
    }
}
