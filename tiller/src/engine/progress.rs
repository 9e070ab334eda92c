use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::lifecycle::ExecutionId;
use crate::lifecycle::store::LifecycleStore;

/// Minimum spacing between persisted progress updates.
const MIN_WRITE_INTERVAL: Duration = Duration::from_secs(5);

/// Strategy for estimating execution progress, chosen at worker startup.
///
/// Backtests start with a time-window estimate (tick counts are only known at EOF) and
/// upgrade to an exact count once the producer reports its total. Live trading has no
/// bounded work, so it reports none.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProgressEstimator {
    /// Unbounded run: no progress.
    Unbounded,
    /// Estimate from the last tick's timestamp within the requested window.
    TimeWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Exact ratio of processed ticks over the producer-reported total.
    CountBased { total: u64 },
}

impl ProgressEstimator {
    pub fn for_backtest(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if end > start {
            Self::TimeWindow { start, end }
        } else {
            Self::Unbounded
        }
    }

    /// Estimate the percentage; `None` when no estimate is possible yet.
    ///
    /// Time-window estimates clamp to `[1, 99]`: once a tick arrived progress should not sit
    /// at zero, and only an EOF may report completion.
    pub fn estimate(&self, processed: u64, last_tick: Option<DateTime<Utc>>) -> Option<u8> {
        match *self {
            Self::Unbounded => None,
            Self::CountBased { total } => {
                if total == 0 {
                    return Some(100);
                }
                let pct = processed.saturating_mul(100) / total;
                Some(pct.min(100) as u8)
            }
            Self::TimeWindow { start, end } => {
                let last_tick = last_tick?;
                let total = end.signed_duration_since(start).num_seconds();
                if total <= 0 {
                    return None;
                }
                let elapsed = last_tick
                    .signed_duration_since(start)
                    .num_seconds()
                    .clamp(0, total);
                let pct = elapsed * 100 / total;
                Some(pct.clamp(1, 99) as u8)
            }
        }
    }
}

/// Persists progress for one execution: only when the integer value changes, never
/// backwards, and at most once per [`MIN_WRITE_INTERVAL`] unless forced.
#[derive(Debug)]
pub struct ProgressTracker {
    estimator: ProgressEstimator,
    last_persisted: Option<u8>,
    last_write: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(estimator: ProgressEstimator) -> Self {
        Self {
            estimator,
            last_persisted: None,
            last_write: None,
        }
    }

    /// Upgrade to count-based estimation once the producer reported its published total.
    pub fn set_total(&mut self, total: u64) {
        self.estimator = ProgressEstimator::CountBased { total };
    }

    pub fn last_persisted(&self) -> Option<u8> {
        self.last_persisted
    }

    /// Estimate and persist when due. Write failures are logged and swallowed: losing a
    /// progress update must not kill the execution.
    pub fn maybe_persist(
        &mut self,
        store: &dyn LifecycleStore,
        execution_id: ExecutionId,
        processed: u64,
        last_tick: Option<DateTime<Utc>>,
        force: bool,
    ) {
        if !force
            && let Some(last_write) = self.last_write
            && last_write.elapsed() < MIN_WRITE_INTERVAL
        {
            return;
        }

        let Some(pct) = self.estimator.estimate(processed, last_tick) else {
            return;
        };
        // Progress is monotone non-decreasing within an execution.
        let pct = pct.max(self.last_persisted.unwrap_or(0));
        if self.last_persisted == Some(pct) {
            return;
        }

        self.write(store, execution_id, pct);
    }

    /// Persist the terminal 100%.
    pub fn complete(&mut self, store: &dyn LifecycleStore, execution_id: ExecutionId) {
        if self.last_persisted == Some(100) {
            return;
        }
        self.write(store, execution_id, 100);
    }

    fn write(&mut self, store: &dyn LifecycleStore, execution_id: ExecutionId, pct: u8) {
        if let Err(err) = store.update_execution_progress(execution_id, pct) {
            warn!(%execution_id, %err, "progress update failed; continuing");
            return;
        }
        self.last_persisted = Some(pct);
        self.last_write = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_integration::de;

    fn window() -> ProgressEstimator {
        ProgressEstimator::for_backtest(
            de::rfc3339_utc("2024-01-01T00:00:00Z").unwrap(),
            de::rfc3339_utc("2024-01-01T01:00:00Z").unwrap(),
        )
    }

    #[test]
    fn test_time_window_estimates_clamp_to_1_99() {
        let estimator = window();

        // No tick seen yet -> no estimate.
        assert_eq!(estimator.estimate(0, None), None);

        // A tick before the window start still reports 1.
        assert_eq!(
            estimator.estimate(1, de::rfc3339_utc("2023-12-31T23:00:00Z")),
            Some(1)
        );

        // Mid-window.
        assert_eq!(
            estimator.estimate(1800, de::rfc3339_utc("2024-01-01T00:30:00Z")),
            Some(50)
        );

        // At (or past) the window end, the estimate holds at 99 until EOF.
        assert_eq!(
            estimator.estimate(3600, de::rfc3339_utc("2024-01-01T01:30:00Z")),
            Some(99)
        );
    }

    #[test]
    fn test_count_based_estimates() {
        let estimator = ProgressEstimator::CountBased { total: 3600 };
        assert_eq!(estimator.estimate(0, None), Some(0));
        assert_eq!(estimator.estimate(1800, None), Some(50));
        assert_eq!(estimator.estimate(3600, None), Some(100));
        assert_eq!(estimator.estimate(4000, None), Some(100));

        // An empty replay is complete immediately.
        assert_eq!(
            ProgressEstimator::CountBased { total: 0 }.estimate(0, None),
            Some(100)
        );
    }

    #[test]
    fn test_unbounded_reports_none() {
        assert_eq!(ProgressEstimator::Unbounded.estimate(1000, None), None);
    }

    #[test]
    fn test_tracker_is_monotone_and_change_gated() {
        use crate::lifecycle::store::{LifecycleStore as _, memory::InMemoryStore};
        use crate::lifecycle::task::BacktestTask;
        use crate::lifecycle::task::Task;
        use crate::lifecycle::{ConfigId, TaskId, TaskStatus, UserId};
        use chrono::Utc;
        use rust_decimal_macros::dec;
        use smol_str::SmolStr;

        let store = InMemoryStore::new();
        let now = Utc::now();
        let task = store
            .insert_task(Task::Backtest(BacktestTask {
                id: TaskId(0),
                owner: UserId(1),
                name: "bt".into(),
                config_id: ConfigId(1),
                status: TaskStatus::Running,
                start_time: now,
                end_time: now + chrono::Duration::hours(1),
                initial_balance: dec!(1000),
                data_source: SmolStr::new("test"),
                created_at: now,
                updated_at: now,
            }))
            .unwrap();
        let execution = store.allocate_execution(task.task_ref(), now).unwrap();

        let mut tracker = ProgressTracker::new(ProgressEstimator::CountBased { total: 100 });
        tracker.maybe_persist(&store, execution.id, 40, None, true);
        assert_eq!(tracker.last_persisted(), Some(40));

        // Count-based estimate dropping (eg/ after a total correction) never writes backwards.
        tracker.set_total(1_000);
        tracker.maybe_persist(&store, execution.id, 50, None, true);
        assert_eq!(tracker.last_persisted(), Some(40));

        tracker.complete(&store, execution.id);
        assert_eq!(tracker.last_persisted(), Some(100));
        assert_eq!(
            store.execution(execution.id).unwrap().unwrap().progress,
            100
        );
    }
}
