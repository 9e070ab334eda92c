//! Run a small backtest end-to-end on the in-memory transports and print the resulting
//! metrics.
//!
//! ```bash
//! cargo run --example backtest_demo
//! ```

use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiller::config::PlatformConfig;
use tiller::engine::{BacktestTickRequest, TickSource};
use tiller::error::TillerError;
use tiller::lifecycle::{TaskStatus, UserId};
use tiller::strategy::example::ThresholdStrategy;
use tiller::strategy::registry::StrategyRegistry;
use tiller::system::builder::SystemBuilder;
use tiller_integration::bus::memory::InMemoryBus;
use tiller_integration::bus::{BusMessage, Tick, TickBus};
use tiller_integration::de;
use tiller_integration::lock::memory::InMemoryLockManager;

use tiller::lifecycle::store::memory::InMemoryStore;

/// Mid-price path that walks the threshold strategy through three round trips.
const PRICES: &[&str] = &[
    "1.1000", // anchor
    "1.0995", // -5 pips: open long
    "1.1000", //
    "1.1005", // +10 pips: close (take profit), anchor resets
    "1.1010", // +5 pips: open short
    "1.1000", // +10 pips for the short: close (take profit)
    "1.0995", // -5 pips: open long
    "1.0985", // -10 pips: close (stop loss)
];

struct DemoTickSource {
    bus: Arc<InMemoryBus>,
}

impl TickSource for DemoTickSource {
    fn publish_ticks_for_backtest(&self, request: BacktestTickRequest) -> Result<(), TillerError> {
        let bus = Arc::clone(&self.bus);
        std::thread::spawn(move || {
            let step = request.end.signed_duration_since(request.start).num_seconds()
                / PRICES.len() as i64;
            for (index, price) in PRICES.iter().enumerate() {
                let tick = Tick {
                    instrument: request.instrument.clone(),
                    timestamp: Some(
                        request.start + chrono::Duration::seconds(step * index as i64),
                    ),
                    bid: None,
                    ask: None,
                    mid: price.parse().ok(),
                };
                let _ = bus.publish(&request.channel, &BusMessage::Tick(tick));
            }
            let _ = bus.publish(
                &request.channel,
                &BusMessage::Eof {
                    count: Some(PRICES.len() as u64),
                },
            );
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tiller::logging::init_logging();

    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(InMemoryLockManager::new());
    let bus = Arc::new(InMemoryBus::new());

    let registry = Arc::new(StrategyRegistry::new());
    registry.register(
        ThresholdStrategy::ID,
        ThresholdStrategy::schema(),
        ThresholdStrategy::factory(),
    );

    let system = SystemBuilder::new(store, locks, bus.clone())
        .source(Arc::new(DemoTickSource { bus }))
        .registry(registry)
        .config(PlatformConfig {
            workers: 1,
            ..PlatformConfig::default()
        })
        .build()?;

    let owner = UserId(1);
    let config = system.tasks.create_config(
        owner,
        "threshold-eurusd",
        ThresholdStrategy::ID,
        json!({
            "instrument": "EUR_USD",
            "entry_pips": "5",
            "take_profit_pips": "10",
        }),
    )?;
    let task = system.tasks.create_backtest_task(
        owner,
        "eurusd-demo",
        config.id,
        de::rfc3339_utc("2024-01-01T00:00:00Z").unwrap(),
        de::rfc3339_utc("2024-01-01T01:00:00Z").unwrap(),
        dec!(10000),
        "demo",
    )?;
    let task_ref = task.task_ref();

    let execution_id = system.tasks.start(task_ref)?;

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let report = system.tasks.status(task_ref)?;
        if matches!(
            report.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        ) {
            println!("backtest finished: {:?} (progress {}%)", report.status, report.progress);
            break;
        }
        if Instant::now() > deadline {
            return Err("backtest did not finish in time".into());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(metrics) = system.tasks.execution_metrics(execution_id)? {
        println!("total trades:  {}", metrics.total_trades);
        println!("win rate:      {}%", metrics.win_rate);
        println!("total pnl:     {}", metrics.total_pnl);
        println!("total return:  {}%", metrics.total_return);
        println!("max drawdown:  {}%", metrics.max_drawdown);
        println!(
            "profit factor: {}",
            metrics
                .profit_factor
                .map(|value| value.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
        println!("equity curve:");
        for point in &metrics.equity_curve {
            println!(
                "  {:>10}  {}",
                point
                    .timestamp
                    .map(|ts| ts.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "start".to_string()),
                point.balance
            );
        }
    }

    system.shutdown().await?;
    Ok(())
}
