use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiller_integration::bus::{DEFAULT_BACKTEST_TICK_CHANNEL_PREFIX, DEFAULT_TICK_CHANNEL};

use crate::lifecycle::TaskType;

/// Platform configuration.
///
/// Every knob has an environment binding read by [`PlatformConfig::from_env`]; defaults match
/// the documented platform behaviour.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Channel name the live tick producer publishes on (`TICK_CHANNEL`).
    pub tick_channel: String,

    /// Prefix for per-backtest replay channels (`BACKTEST_TICK_CHANNEL_PREFIX`).
    pub backtest_tick_channel_prefix: String,

    /// Heartbeat age beyond which a lock record counts as stale
    /// (`STALE_THRESHOLD_SECONDS`).
    pub stale_threshold_seconds: u64,

    /// Minimum interval between worker heartbeats (`HEARTBEAT_INTERVAL_SECONDS`).
    pub heartbeat_interval_seconds: u64,

    /// How long a queued execution may sit without a worker lock before it is failed
    /// (`WORKER_STARTUP_TIMEOUT_SECONDS`).
    pub worker_startup_timeout_seconds: u64,

    /// Throttle on worker polls of the persisted task status
    /// (`STATUS_POLL_INTERVAL_SECONDS`).
    pub status_poll_interval_seconds: u64,

    /// Tick cadence of state/checkpoint persistence for live trading
    /// (`TRADING_PROGRESS_INTERVAL_TICKS`).
    pub trading_progress_interval_ticks: u64,

    /// Tick cadence of checkpoint/progress persistence for backtests
    /// (`BACKTEST_PROGRESS_INTERVAL_TICKS`).
    pub backtest_progress_interval_ticks: u64,

    /// Worker pool size (`WORKERS`).
    pub workers: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            tick_channel: DEFAULT_TICK_CHANNEL.to_string(),
            backtest_tick_channel_prefix: DEFAULT_BACKTEST_TICK_CHANNEL_PREFIX.to_string(),
            stale_threshold_seconds: 130,
            heartbeat_interval_seconds: 5,
            worker_startup_timeout_seconds: 120,
            status_poll_interval_seconds: 2,
            trading_progress_interval_ticks: 50,
            backtest_progress_interval_ticks: 250,
            workers: 4,
        }
    }
}

impl PlatformConfig {
    /// Build a configuration from the process environment, falling back to defaults for
    /// unset or unparseable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_channel: env_string("TICK_CHANNEL").unwrap_or(defaults.tick_channel),
            backtest_tick_channel_prefix: env_string("BACKTEST_TICK_CHANNEL_PREFIX")
                .unwrap_or(defaults.backtest_tick_channel_prefix),
            stale_threshold_seconds: env_u64("STALE_THRESHOLD_SECONDS")
                .unwrap_or(defaults.stale_threshold_seconds),
            heartbeat_interval_seconds: env_u64("HEARTBEAT_INTERVAL_SECONDS")
                .unwrap_or(defaults.heartbeat_interval_seconds),
            worker_startup_timeout_seconds: env_u64("WORKER_STARTUP_TIMEOUT_SECONDS")
                .unwrap_or(defaults.worker_startup_timeout_seconds),
            status_poll_interval_seconds: env_u64("STATUS_POLL_INTERVAL_SECONDS")
                .unwrap_or(defaults.status_poll_interval_seconds),
            trading_progress_interval_ticks: env_u64("TRADING_PROGRESS_INTERVAL_TICKS")
                .unwrap_or(defaults.trading_progress_interval_ticks),
            backtest_progress_interval_ticks: env_u64("BACKTEST_PROGRESS_INTERVAL_TICKS")
                .unwrap_or(defaults.backtest_progress_interval_ticks),
            workers: env_u64("WORKERS")
                .map(|value| value as usize)
                .unwrap_or(defaults.workers),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn worker_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_startup_timeout_seconds)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_seconds)
    }

    /// Full channel name for a backtest replay request.
    pub fn backtest_channel(&self, request_id: &str) -> String {
        format!("{}{}", self.backtest_tick_channel_prefix, request_id)
    }

    /// Tick cadence of checkpoint persistence for the given task kind.
    pub fn progress_interval_ticks(&self, task_type: TaskType) -> u64 {
        match task_type {
            TaskType::Trading => self.trading_progress_interval_ticks.max(1),
            TaskType::Backtest => self.backtest_progress_interval_ticks.max(1),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
