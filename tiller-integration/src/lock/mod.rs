use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub mod memory;
pub mod redis;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum LockError {
    #[error("lock transport: {0}")]
    Transport(String),

    #[error("lock record codec: {0}")]
    Codec(String),
}

/// Status of a worker lock record.
///
/// `Running` and `StopRequested` mark a live holder; the remaining statuses are terminal and
/// leave the record behind as a tombstone describing how the last run ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    Running,
    StopRequested,
    Stopped,
    Completed,
    Failed,
}

impl LockStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

/// Worker-control record granting exclusive execution rights per `(task_name, instance_key)`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LockInfo {
    pub task_name: SmolStr,
    pub instance_key: SmolStr,
    pub worker_id: String,
    pub status: LockStatus,
    pub status_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub meta: Value,
}

impl LockInfo {
    /// A record is stale once its holder has missed heartbeats for longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat_at)
            > chrono::Duration::seconds(threshold.as_secs() as i64)
    }

    pub fn stop_requested(&self) -> bool {
        self.status == LockStatus::StopRequested
    }

    /// Merge `update` into the record's meta object, overwriting colliding keys.
    pub(crate) fn merge_meta(&mut self, update: Value) {
        match (&mut self.meta, update) {
            (Value::Object(current), Value::Object(update)) => {
                current.extend(update);
            }
            (meta, update) if !update.is_null() => *meta = update,
            _ => {}
        }
    }
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// Lock granted to the caller.
    Acquired,
    /// A live worker holds the lock; the attempt is rejected.
    Held(LockInfo),
    /// A dead worker left a stale record behind; remove it and retry once.
    Stale(LockInfo),
}

/// Best-effort distributed lock per task, with heartbeats and a cancellation flag.
///
/// Lock loss is not fatal by itself: a holder whose heartbeat stops landing treats that as a
/// signal to shut down cleanly, and a crashed holder leaves a stale record that is garbage
/// collected on the next acquisition or status read.
pub trait TaskLockManager: Send + Sync {
    /// Atomically acquire the lock. Refuses when a live (non-terminal, non-stale) record
    /// exists; reports stale records so the caller can recover them.
    fn acquire(
        &self,
        task_name: &str,
        instance_key: &str,
        worker_id: &str,
        meta: Value,
        stale_threshold: Duration,
    ) -> Result<AcquireOutcome, LockError>;

    /// Refresh `last_heartbeat_at`. Returns `Ok(false)` when the caller no longer holds the
    /// lock (record gone or re-acquired by another worker) - the holder should stop cleanly.
    fn heartbeat(
        &self,
        task_name: &str,
        instance_key: &str,
        worker_id: &str,
        status_message: Option<String>,
        meta_update: Option<Value>,
    ) -> Result<bool, LockError>;

    /// Flag the holder to stop. Returns `false` when no live record exists.
    fn request_stop(
        &self,
        task_name: &str,
        instance_key: &str,
        message: &str,
    ) -> Result<bool, LockError>;

    /// Terminally release the lock. `status` must be one of the terminal [`LockStatus`]es.
    fn release(
        &self,
        task_name: &str,
        instance_key: &str,
        status: LockStatus,
        message: Option<String>,
    ) -> Result<(), LockError>;

    /// Remove the record entirely (stale-lock garbage collection).
    fn remove(&self, task_name: &str, instance_key: &str) -> Result<(), LockError>;

    /// Read the current record, if any.
    fn info(&self, task_name: &str, instance_key: &str) -> Result<Option<LockInfo>, LockError>;
}

/// Acquire with the single stale-takeover retry of the duplicate-start protocol: a stale
/// record is released first (conflict recovery), then the acquisition is retried once.
pub fn acquire_or_takeover(
    locks: &dyn TaskLockManager,
    task_name: &str,
    instance_key: &str,
    worker_id: &str,
    meta: Value,
    stale_threshold: Duration,
) -> Result<AcquireOutcome, LockError> {
    match locks.acquire(
        task_name,
        instance_key,
        worker_id,
        meta.clone(),
        stale_threshold,
    )? {
        AcquireOutcome::Stale(stale) => {
            warn!(
                task_name,
                instance_key,
                previous_worker = %stale.worker_id,
                "stale lock record found; releasing and retrying acquisition"
            );
            locks.remove(task_name, instance_key)?;
            locks.acquire(task_name, instance_key, worker_id, meta, stale_threshold)
        }
        outcome => Ok(outcome),
    }
}

pub(crate) fn new_lock_info(
    task_name: &str,
    instance_key: &str,
    worker_id: &str,
    meta: Value,
    now: DateTime<Utc>,
) -> LockInfo {
    LockInfo {
        task_name: SmolStr::new(task_name),
        instance_key: SmolStr::new(instance_key),
        worker_id: worker_id.to_string(),
        status: LockStatus::Running,
        status_message: None,
        started_at: now,
        last_heartbeat_at: now,
        stopped_at: None,
        meta,
    }
}
