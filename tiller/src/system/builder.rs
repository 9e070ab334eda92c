use parking_lot::Mutex;
use std::sync::Arc;
use tiller_integration::bus::TickBus;
use tiller_integration::channel::{UnboundedRx, mpsc_unbounded};
use tiller_integration::lock::TaskLockManager;
use tracing::info;

use super::System;
use crate::config::PlatformConfig;
use crate::dispatch::{Dispatcher, WorkerJob};
use crate::engine::{NullTickSource, TickSource, Worker, process_worker_id};
use crate::error::TillerError;
use crate::gateway::{NullOrderGateway, OrderGateway};
use crate::lifecycle::machine::TaskService;
use crate::lifecycle::store::LifecycleStore;
use crate::strategy::registry::StrategyRegistry;

/// Builder wiring the store, transports and worker pool into a running [`System`].
///
/// The store, locks and bus are mandatory; the tick source, gateway, registry, config and
/// runtime are optional with sensible defaults.
#[allow(missing_debug_implementations)]
pub struct SystemBuilder {
    store: Arc<dyn LifecycleStore>,
    locks: Arc<dyn TaskLockManager>,
    bus: Arc<dyn TickBus>,
    source: Arc<dyn TickSource>,
    gateway: Arc<dyn OrderGateway>,
    registry: Arc<StrategyRegistry>,
    config: Arc<PlatformConfig>,
    runtime: Option<tokio::runtime::Handle>,
}

impl SystemBuilder {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        locks: Arc<dyn TaskLockManager>,
        bus: Arc<dyn TickBus>,
    ) -> Self {
        Self {
            store,
            locks,
            bus,
            source: Arc::new(NullTickSource),
            gateway: Arc::new(NullOrderGateway),
            registry: Arc::new(StrategyRegistry::new()),
            config: Arc::new(PlatformConfig::default()),
            runtime: None,
        }
    }

    pub fn source(self, value: Arc<dyn TickSource>) -> Self {
        Self {
            source: value,
            ..self
        }
    }

    pub fn gateway(self, value: Arc<dyn OrderGateway>) -> Self {
        Self {
            gateway: value,
            ..self
        }
    }

    pub fn registry(self, value: Arc<StrategyRegistry>) -> Self {
        Self {
            registry: value,
            ..self
        }
    }

    pub fn config(self, value: PlatformConfig) -> Self {
        Self {
            config: Arc::new(value),
            ..self
        }
    }

    pub fn runtime(self, value: tokio::runtime::Handle) -> Self {
        Self {
            runtime: Some(value),
            ..self
        }
    }

    /// Spawn the worker pool and assemble the control-plane service.
    ///
    /// Each worker runs its synchronous execution loop on a blocking thread of the provided
    /// (or ambient) Tokio runtime, draining one shared job queue.
    pub fn build(self) -> Result<System, TillerError> {
        let Self {
            store,
            locks,
            bus,
            source,
            gateway,
            registry,
            config,
            runtime,
        } = self;

        let runtime = runtime.unwrap_or_else(tokio::runtime::Handle::current);
        let (jobs_tx, jobs_rx) = mpsc_unbounded();
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let dispatcher = Dispatcher::new(Arc::clone(&store), jobs_tx.clone());
        let tasks = TaskService::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            dispatcher,
            Arc::clone(&registry),
            Arc::clone(&config),
        );

        let process_id = process_worker_id();
        let workers = (0..config.workers.max(1))
            .map(|index| {
                let worker = Worker::new(
                    Arc::clone(&store),
                    Arc::clone(&locks),
                    Arc::clone(&bus),
                    Arc::clone(&source),
                    Arc::clone(&gateway),
                    Arc::clone(&registry),
                    Arc::clone(&config),
                    format!("{process_id}#{index}"),
                );
                let jobs_rx = Arc::clone(&jobs_rx);
                runtime.spawn_blocking(move || worker_loop(worker, jobs_rx))
            })
            .collect();

        info!(workers = config.workers.max(1), "tiller system started");
        Ok(System::new(tasks, jobs_tx, workers))
    }
}

fn worker_loop(worker: Worker, jobs: Arc<Mutex<UnboundedRx<WorkerJob>>>) {
    loop {
        // Hold the queue lock only while waiting; release it before running the job so the
        // rest of the pool keeps draining.
        let job = {
            let mut jobs = jobs.lock();
            jobs.blocking_recv()
        };
        match job {
            None | Some(WorkerJob::Shutdown) => break,
            Some(job) => worker.process(job),
        }
    }
    info!(worker_id = %worker.worker_id, "worker exited");
}
