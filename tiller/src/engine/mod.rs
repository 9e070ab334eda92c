use derive_more::Constructor;
use smol_str::SmolStr;
use std::fmt;
use std::sync::Arc;
use tiller_integration::bus::TickBus;
use tiller_integration::lock::TaskLockManager;
use tracing::{error, info};

use crate::config::PlatformConfig;
use crate::dispatch::WorkerJob;
use crate::error::TillerError;
use crate::gateway::OrderGateway;
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::{ExecutionId, TaskRef};
use crate::strategy::registry::StrategyRegistry;

/// Progress estimation strategies for bounded and unbounded runs.
pub mod progress;

/// The per-execution run loop.
pub mod run;

/// Unified polling of the two cancellation channels and the lifecycle status.
pub mod signals;

/// Identifies the worker thread driving an execution.
///
/// Passed explicitly through the run loop; workers never consult ambient task metadata.
#[derive(Debug, Clone, Constructor)]
pub struct WorkerContext {
    pub worker_id: String,
    pub task: TaskRef,
    pub execution_id: ExecutionId,
}

/// `host:pid` identity recorded on lock records so operators can find the holding process.
pub fn process_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}:{}", std::process::id())
}

/// Command asking the tick source to replay a bounded historical window onto `channel`.
#[derive(Debug, Clone, Eq, PartialEq, Constructor)]
pub struct BacktestTickRequest {
    pub instrument: SmolStr,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub request_id: String,
    pub channel: String,
}

/// The market data producer, as seen by backtest workers.
///
/// The producer publishes the requested ticks on the derived channel and terminates the
/// stream with an `eof` control record carrying the published count.
pub trait TickSource: Send + Sync {
    fn publish_ticks_for_backtest(&self, request: BacktestTickRequest)
    -> Result<(), TillerError>;
}

/// Source for live-only deployments: backtest replay requests are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTickSource;

impl TickSource for NullTickSource {
    fn publish_ticks_for_backtest(
        &self,
        request: BacktestTickRequest,
    ) -> Result<(), TillerError> {
        Err(TillerError::execution(format!(
            "no tick source configured; cannot replay {} for request {}",
            request.instrument, request.request_id
        )))
    }
}

/// One worker of the pool. Hosts one execution at a time and drives it to termination.
#[derive(Clone)]
pub struct Worker {
    pub(crate) store: Arc<dyn LifecycleStore>,
    pub(crate) locks: Arc<dyn TaskLockManager>,
    pub(crate) bus: Arc<dyn TickBus>,
    pub(crate) source: Arc<dyn TickSource>,
    pub(crate) gateway: Arc<dyn OrderGateway>,
    pub(crate) registry: Arc<StrategyRegistry>,
    pub(crate) config: Arc<PlatformConfig>,
    pub(crate) worker_id: String,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl Worker {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        locks: Arc<dyn TaskLockManager>,
        bus: Arc<dyn TickBus>,
        source: Arc<dyn TickSource>,
        gateway: Arc<dyn OrderGateway>,
        registry: Arc<StrategyRegistry>,
        config: Arc<PlatformConfig>,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            locks,
            bus,
            source,
            gateway,
            registry,
            config,
            worker_id,
        }
    }

    /// Process one job to completion. Failures are logged and surfaced to the pool host; a
    /// failed execution has already been finalized by the run loop by the time this returns.
    pub fn process(&self, job: WorkerJob) {
        match job {
            WorkerJob::Run { task, execution_id } => {
                if let Err(err) = run::run_execution(self, task, execution_id) {
                    error!(task = %task, %err, "execution worker failed");
                }
            }
            WorkerJob::ClosePositions { task, account_id } => {
                match self.close_positions(account_id) {
                    Ok(closed) => {
                        info!(task = %task, %account_id, closed, "closed open positions")
                    }
                    Err(err) => {
                        error!(task = %task, %account_id, %err, "closing positions failed")
                    }
                }
            }
            WorkerJob::Shutdown => {}
        }
    }

    fn close_positions(
        &self,
        account_id: crate::lifecycle::AccountId,
    ) -> Result<u32, TillerError> {
        let account = self
            .store
            .account(account_id)?
            .ok_or_else(|| TillerError::not_found(format!("account {account_id}")))?;
        self.gateway.close_all_positions(&account)
    }
}
