//! Read-time reconciliation of executions whose workers died or were never picked up. No
//! worker pool runs here: jobs sit in an undrained queue, exactly like a crashed or absent
//! worker fleet.

use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use tiller::config::PlatformConfig;
use tiller::dispatch::Dispatcher;
use tiller::lifecycle::machine::TaskService;
use tiller::lifecycle::reconcile::{STARTUP_FAILURE_MESSAGE, reconcile_and_report};
use tiller::lifecycle::store::memory::InMemoryStore;
use tiller::lifecycle::store::LifecycleStore;
use tiller::lifecycle::{ExecutionStatus, TaskStatus, UserId};
use tiller::strategy::example::ThresholdStrategy;
use tiller::strategy::registry::StrategyRegistry;
use tiller_integration::channel::{UnboundedRx, mpsc_unbounded};
use tiller_integration::lock::memory::InMemoryLockManager;
use tiller_integration::lock::{LockStatus, TaskLockManager};

struct Fixture {
    service: TaskService,
    store: Arc<InMemoryStore>,
    locks: Arc<InMemoryLockManager>,
    config: PlatformConfig,
    // Held so dispatched jobs queue up without a worker pool.
    _jobs_rx: UnboundedRx<tiller::dispatch::WorkerJob>,
    owner: UserId,
    config_id: tiller::lifecycle::ConfigId,
    account_id: tiller::lifecycle::AccountId,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(InMemoryLockManager::new());
    let registry = Arc::new(StrategyRegistry::new());
    registry.register(
        ThresholdStrategy::ID,
        ThresholdStrategy::schema(),
        ThresholdStrategy::factory(),
    );

    let (jobs_tx, jobs_rx) = mpsc_unbounded();
    let dispatcher = Dispatcher::new(store.clone(), jobs_tx);
    let config = PlatformConfig::default();
    let service = TaskService::new(
        store.clone(),
        locks.clone(),
        dispatcher,
        registry,
        Arc::new(config.clone()),
    );

    let owner = UserId(1);
    let strategy_config = service
        .create_config(
            owner,
            "threshold",
            ThresholdStrategy::ID,
            json!({
                "instrument": "EUR_USD",
                "entry_pips": "5",
                "take_profit_pips": "10",
            }),
        )
        .unwrap();
    let account = service
        .register_account(owner, "primary", dec!(10000), true)
        .unwrap();

    Fixture {
        service,
        store,
        locks,
        config,
        _jobs_rx: jobs_rx,
        owner,
        config_id: strategy_config.id,
        account_id: account.id,
    }
}

#[test]
fn test_startup_timeout_fails_never_started_execution() {
    let fixture = fixture();
    let task = fixture
        .service
        .create_trading_task(fixture.owner, "t1", fixture.config_id, fixture.account_id)
        .unwrap()
        .task_ref();
    let execution_id = fixture.service.start(task).unwrap();

    // Within the timeout the execution is simply still queued.
    let soon = Utc::now() + chrono::Duration::seconds(60);
    let report = reconcile_and_report(
        fixture.store.as_ref(),
        fixture.locks.as_ref(),
        &fixture.config,
        task,
        soon,
    )
    .unwrap();
    assert_eq!(report.status, TaskStatus::Running);
    assert_eq!(report.progress, 0);

    // Past the startup timeout with no lock: the execution failed to start.
    let late = Utc::now() + chrono::Duration::seconds(121);
    let report = reconcile_and_report(
        fixture.store.as_ref(),
        fixture.locks.as_ref(),
        &fixture.config,
        task,
        late,
    )
    .unwrap();

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.error_message.as_deref(), Some(STARTUP_FAILURE_MESSAGE));

    let execution = fixture.store.execution(execution_id).unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error_message.as_deref(),
        Some(STARTUP_FAILURE_MESSAGE)
    );
    assert!(
        execution
            .logs
            .iter()
            .any(|line| line.message == STARTUP_FAILURE_MESSAGE)
    );
}

#[test]
fn test_stale_running_task_aligns_to_terminal_execution() {
    let fixture = fixture();
    let task = fixture
        .service
        .create_trading_task(fixture.owner, "t1", fixture.config_id, fixture.account_id)
        .unwrap()
        .task_ref();
    let execution_id = fixture.service.start(task).unwrap();

    // Simulate a worker that finished the execution and died before flipping the task.
    fixture
        .store
        .finalize_execution(execution_id, ExecutionStatus::Completed, None, Utc::now())
        .unwrap();

    // Inside the 30 s grace window the task is left alone and reported as pending a new
    // execution.
    let report = reconcile_and_report(
        fixture.store.as_ref(),
        fixture.locks.as_ref(),
        &fixture.config,
        task,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(report.status, TaskStatus::Running);
    assert!(report.pending_new_execution);
    assert_eq!(report.progress, 0);

    // Once the grace window passes and no live lock exists, the task aligns to the
    // execution's terminal status.
    let later = Utc::now() + chrono::Duration::seconds(45);
    let report = reconcile_and_report(
        fixture.store.as_ref(),
        fixture.locks.as_ref(),
        &fixture.config,
        task,
        later,
    )
    .unwrap();
    assert_eq!(report.status, TaskStatus::Completed);
    assert!(!report.pending_new_execution);
}

#[test]
fn test_stale_lock_is_garbage_collected_during_alignment() {
    let fixture = fixture();
    let task = fixture
        .service
        .create_trading_task(fixture.owner, "t1", fixture.config_id, fixture.account_id)
        .unwrap()
        .task_ref();
    let execution_id = fixture.service.start(task).unwrap();

    // Dead worker: terminal execution plus a lock record whose heartbeats stopped.
    fixture
        .store
        .finalize_execution(execution_id, ExecutionStatus::Stopped, None, Utc::now())
        .unwrap();
    fixture
        .locks
        .acquire("trading", &task.instance_key(), "dead-worker", json!({}), fixture.config.stale_threshold())
        .unwrap();

    // Far past both the grace window and the stale threshold.
    let later = Utc::now() + chrono::Duration::seconds(300);
    let report = reconcile_and_report(
        fixture.store.as_ref(),
        fixture.locks.as_ref(),
        &fixture.config,
        task,
        later,
    )
    .unwrap();

    assert_eq!(report.status, TaskStatus::Stopped);
    assert_eq!(
        fixture.locks.info("trading", &task.instance_key()).unwrap(),
        None
    );
}

#[test]
fn test_stop_in_flight_finalizes_running_execution() {
    let fixture = fixture();
    let task = fixture
        .service
        .create_trading_task(fixture.owner, "t1", fixture.config_id, fixture.account_id)
        .unwrap()
        .task_ref();
    let execution_id = fixture.service.start(task).unwrap();

    // A worker picked the job up and holds the lock.
    fixture
        .locks
        .acquire("trading", &task.instance_key(), "worker-a", json!({}), fixture.config.stale_threshold())
        .unwrap();

    // Control plane stops the task, but this store write races ahead of the worker: put the
    // execution back to RUNNING as if the stop verb had not touched it.
    fixture
        .service
        .stop(task, tiller::lifecycle::StopMode::Immediate)
        .unwrap();
    {
        // Undo the eager finalization to exercise the reconciler's stop-in-flight rule.
        let store = fixture.store.as_ref();
        let fresh = store.allocate_execution(task, Utc::now()).unwrap();
        assert!(fresh.status == ExecutionStatus::Running);
    }

    let report = reconcile_and_report(
        fixture.store.as_ref(),
        fixture.locks.as_ref(),
        &fixture.config,
        task,
        Utc::now(),
    )
    .unwrap();

    assert_eq!(report.status, TaskStatus::Stopped);
    let latest = fixture.store.latest_execution(task).unwrap().unwrap();
    assert_eq!(latest.status, ExecutionStatus::Stopped);
    assert!(latest.completed_at.is_some());
    // Any lingering lock is released.
    assert_eq!(
        fixture.locks.info("trading", &task.instance_key()).unwrap(),
        None
    );
}

#[test]
fn test_release_keeps_tombstone_for_status_reads() {
    let fixture = fixture();
    let task = fixture
        .service
        .create_trading_task(fixture.owner, "t1", fixture.config_id, fixture.account_id)
        .unwrap()
        .task_ref();
    fixture.service.start(task).unwrap();

    fixture
        .locks
        .acquire("trading", &task.instance_key(), "worker-a", json!({}), fixture.config.stale_threshold())
        .unwrap();
    fixture
        .locks
        .release(
            "trading",
            &task.instance_key(),
            LockStatus::Failed,
            Some("boom".into()),
        )
        .unwrap();

    let info = fixture
        .locks
        .info("trading", &task.instance_key())
        .unwrap()
        .unwrap();
    assert_eq!(info.status, LockStatus::Failed);
    assert_eq!(info.status_message.as_deref(), Some("boom"));
    assert!(info.stopped_at.is_some());
}
