//! End-to-end backtest execution over the in-memory transports: a bounded replay drives a
//! scripted strategy to completion, and the persisted lifecycle, metrics and incremental
//! reads are checked against the run.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiller::Sequence;
use tiller::config::PlatformConfig;
use tiller::engine::{BacktestTickRequest, TickSource};
use tiller::error::TillerError;
use tiller::lifecycle::{ExecutionStatus, TaskStatus, UserId};
use tiller::statistic::PROFIT_FACTOR_CAP;
use tiller::strategy::event::StrategyEvent;
use tiller::strategy::registry::StrategyRegistry;
use tiller::strategy::{Strategy, StrategyState};
use tiller::system::builder::SystemBuilder;
use tiller_integration::bus::memory::InMemoryBus;
use tiller_integration::bus::{BusMessage, Tick, TickBus};
use tiller_integration::de;
use tiller_integration::lock::TaskLockManager;
use tiller_integration::lock::memory::InMemoryLockManager;

use tiller::lifecycle::store::memory::InMemoryStore;

const TICKS: u64 = 240;

/// Emits two `close` trades at fixed points of the replay: +50 and -20.
#[derive(Debug, Default)]
struct ScriptedStrategy {
    seen: u64,
}

impl ScriptedStrategy {
    fn close(pnl: &str, pips: &str, reason: &str) -> StrategyEvent {
        StrategyEvent::with_details(
            "close",
            json!({
                "pnl": pnl,
                "pips": pips,
                "reason": reason,
                "instrument": "EUR_USD",
                "direction": "long",
            }),
        )
    }
}

impl Strategy for ScriptedStrategy {
    fn on_start(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (state, vec![StrategyEvent::new("strategy_started")])
    }

    fn on_tick(&mut self, _tick: &Tick, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        self.seen += 1;
        let events = match self.seen {
            100 => vec![Self::close("50", "5.0", "take_profit")],
            200 => vec![Self::close("-20", "-2.0", "stop_loss")],
            _ => Vec::new(),
        };
        (state, events)
    }

    fn on_pause(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (state, Vec::new())
    }

    fn on_resume(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (state, Vec::new())
    }

    fn on_stop(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (state, vec![StrategyEvent::new("strategy_stopped")])
    }
}

/// Publishes `TICKS` ticks spanning the requested window, then the EOF control record.
struct ReplayTickSource {
    bus: Arc<InMemoryBus>,
}

impl TickSource for ReplayTickSource {
    fn publish_ticks_for_backtest(&self, request: BacktestTickRequest) -> Result<(), TillerError> {
        let bus = Arc::clone(&self.bus);
        std::thread::spawn(move || {
            let window = request.end.signed_duration_since(request.start);
            let step = window.num_seconds() / TICKS as i64;
            for index in 0..TICKS {
                let tick = Tick {
                    instrument: request.instrument.clone(),
                    timestamp: Some(
                        request.start + chrono::Duration::seconds(step * index as i64),
                    ),
                    bid: Some(dec!(1.1000)),
                    ask: Some(dec!(1.1002)),
                    mid: None,
                }
                .normalize();
                bus.publish(&request.channel, &BusMessage::Tick(tick))
                    .expect("publish tick");
            }
            bus.publish(&request.channel, &BusMessage::Eof { count: Some(TICKS) })
                .expect("publish eof");
        });
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backtest_happy_path() {
    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(InMemoryLockManager::new());
    let bus = Arc::new(InMemoryBus::new());

    let registry = Arc::new(StrategyRegistry::new());
    registry.register(
        "scripted",
        json!({}),
        Box::new(|_parameters: &Value| {
            Ok(Box::new(ScriptedStrategy::default()) as Box<dyn Strategy>)
        }),
    );

    let system = SystemBuilder::new(store.clone(), locks.clone(), bus.clone())
        .source(Arc::new(ReplayTickSource {
            bus: Arc::clone(&bus),
        }))
        .registry(registry)
        .config(PlatformConfig {
            workers: 2,
            ..PlatformConfig::default()
        })
        .build()
        .expect("build system");

    let owner = UserId(1);
    let config = system
        .tasks
        .create_config(owner, "scripted", "scripted", json!({"instrument": "EUR_USD"}))
        .unwrap();
    let task = system
        .tasks
        .create_backtest_task(
            owner,
            "eurusd-hour",
            config.id,
            de::rfc3339_utc("2024-01-01T00:00:00Z").unwrap(),
            de::rfc3339_utc("2024-01-01T01:00:00Z").unwrap(),
            dec!(10000),
            "historical",
        )
        .unwrap();
    let task_ref = task.task_ref();

    let execution_id = system.tasks.start(task_ref).unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let report = system.tasks.status(task_ref).unwrap();
        if report.status == TaskStatus::Completed {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "backtest did not complete: {report:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Terminal state: execution COMPLETED at progress 100, no pending execution.
    let report = system.tasks.status(task_ref).unwrap();
    assert_eq!(report.progress, 100);
    assert!(!report.pending_new_execution);
    assert_eq!(report.error_message, None);

    let execution = system.tasks.execution(execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.progress, 100);
    assert!(execution.completed_at.is_some());

    // Final metrics from the two scripted trades.
    let metrics = system
        .tasks
        .execution_metrics(execution_id)
        .unwrap()
        .expect("final metrics written");
    assert_eq!(metrics.total_trades, 2);
    assert_eq!(metrics.total_pnl, dec!(30));
    assert_eq!(metrics.win_rate, dec!(50));
    assert_eq!(metrics.profit_factor, Some(dec!(2.5)));
    assert_ne!(metrics.profit_factor, Some(PROFIT_FACTOR_CAP));

    let balances: Vec<Decimal> = metrics
        .equity_curve
        .iter()
        .map(|point| point.balance)
        .collect();
    assert_eq!(balances, vec![dec!(10000), dec!(10050), dec!(10030)]);

    // The equity sink mirrors the curve incrementally: seed point plus one per trade.
    let equity = system
        .tasks
        .equity_since(execution_id, Sequence(0), 100)
        .unwrap();
    let sink_balances: Vec<Decimal> = equity.iter().map(|point| point.balance).collect();
    assert_eq!(sink_balances, vec![dec!(10000), dec!(10050), dec!(10030)]);

    // Event stream: started + 2 closes + stopped, densely sequenced.
    let events = system
        .tasks
        .events_since(execution_id, Sequence(0), 100)
        .unwrap();
    let kinds: Vec<&str> = events.iter().map(|record| record.event.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["strategy_started", "close", "close", "strategy_stopped"]
    );
    let sequences: Vec<u64> = events.iter().map(|record| record.sequence.value()).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    // Incremental reads compose with the full read.
    let tail = system
        .tasks
        .events_since(execution_id, Sequence(2), 100)
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].sequence.value(), 3);

    let trades = system
        .tasks
        .trades_since(execution_id, Sequence(0), 100)
        .unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].pnl, dec!(50));
    assert_eq!(trades[1].pnl, dec!(-20));

    // Enrichment stamped tick context onto the close events.
    assert!(events[1].event.timestamp.is_some());
    assert_eq!(events[1].event.exit_price(), Some(dec!(1.1001)));

    // 240 ticks under the default 250-tick cadence: no checkpoint fires.
    let checkpoints = system.tasks.metrics_checkpoints(execution_id).unwrap();
    assert!(checkpoints.is_empty());

    system.shutdown().await.expect("shutdown");

    // The lock tombstone records the clean completion.
    let info = locks.info("backtest", &task_ref.instance_key()).unwrap();
    assert_eq!(
        info.map(|info| info.status),
        Some(tiller_integration::lock::LockStatus::Completed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backtest_checkpoints_at_cadence() {
    // Lower the checkpoint cadence so a short replay produces checkpoints.
    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(InMemoryLockManager::new());
    let bus = Arc::new(InMemoryBus::new());

    let registry = Arc::new(StrategyRegistry::new());
    registry.register(
        "scripted",
        json!({}),
        Box::new(|_parameters: &Value| {
            Ok(Box::new(ScriptedStrategy::default()) as Box<dyn Strategy>)
        }),
    );

    let system = SystemBuilder::new(store.clone(), locks.clone(), bus.clone())
        .source(Arc::new(ReplayTickSource {
            bus: Arc::clone(&bus),
        }))
        .registry(registry)
        .config(PlatformConfig {
            workers: 1,
            backtest_progress_interval_ticks: 50,
            ..PlatformConfig::default()
        })
        .build()
        .expect("build system");

    let owner = UserId(7);
    let config = system
        .tasks
        .create_config(owner, "scripted", "scripted", json!({"instrument": "EUR_USD"}))
        .unwrap();
    let task = system
        .tasks
        .create_backtest_task(
            owner,
            "eurusd-cadence",
            config.id,
            de::rfc3339_utc("2024-01-01T00:00:00Z").unwrap(),
            de::rfc3339_utc("2024-01-01T01:00:00Z").unwrap(),
            dec!(10000),
            "historical",
        )
        .unwrap();
    let task_ref = task.task_ref();
    let execution_id = system.tasks.start(task_ref).unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while system.tasks.status(task_ref).unwrap().status != TaskStatus::Completed {
        assert!(Instant::now() < deadline, "backtest did not complete");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // 240 ticks at a 50-tick cadence -> 4 checkpoints, monotone by creation time.
    let checkpoints = system.tasks.metrics_checkpoints(execution_id).unwrap();
    assert_eq!(checkpoints.len(), 4);
    for pair in checkpoints.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
        assert!(pair[0].processed < pair[1].processed);
    }
    // The checkpoint after the first scripted trade carries its PnL.
    assert_eq!(checkpoints[1].processed, 100);
    assert_eq!(checkpoints[1].metrics.total_pnl, dec!(50));

    system.shutdown().await.expect("shutdown");
}
