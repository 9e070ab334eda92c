use super::{AcquireOutcome, LockError, LockInfo, LockStatus, TaskLockManager, new_lock_info};
use chrono::Utc;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// In-memory lock manager used for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockManager {
    records: Arc<Mutex<FnvHashMap<String, LockInfo>>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(task_name: &str, instance_key: &str) -> String {
        format!("{task_name}:{instance_key}")
    }
}

impl TaskLockManager for InMemoryLockManager {
    fn acquire(
        &self,
        task_name: &str,
        instance_key: &str,
        worker_id: &str,
        meta: Value,
        stale_threshold: Duration,
    ) -> Result<AcquireOutcome, LockError> {
        let now = Utc::now();
        let mut records = self.records.lock();
        let key = Self::key(task_name, instance_key);

        if let Some(existing) = records.get(&key)
            && !existing.status.is_terminal()
        {
            if existing.is_stale(now, stale_threshold) {
                return Ok(AcquireOutcome::Stale(existing.clone()));
            }
            return Ok(AcquireOutcome::Held(existing.clone()));
        }

        records.insert(
            key,
            new_lock_info(task_name, instance_key, worker_id, meta, now),
        );
        Ok(AcquireOutcome::Acquired)
    }

    fn heartbeat(
        &self,
        task_name: &str,
        instance_key: &str,
        worker_id: &str,
        status_message: Option<String>,
        meta_update: Option<Value>,
    ) -> Result<bool, LockError> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&Self::key(task_name, instance_key)) else {
            return Ok(false);
        };
        if record.worker_id != worker_id || record.status.is_terminal() {
            return Ok(false);
        }

        record.last_heartbeat_at = Utc::now();
        if status_message.is_some() {
            record.status_message = status_message;
        }
        if let Some(update) = meta_update {
            record.merge_meta(update);
        }
        Ok(true)
    }

    fn request_stop(
        &self,
        task_name: &str,
        instance_key: &str,
        message: &str,
    ) -> Result<bool, LockError> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&Self::key(task_name, instance_key)) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        record.status = LockStatus::StopRequested;
        record.status_message = Some(message.to_string());
        record.last_heartbeat_at = Utc::now();
        Ok(true)
    }

    fn release(
        &self,
        task_name: &str,
        instance_key: &str,
        status: LockStatus,
        message: Option<String>,
    ) -> Result<(), LockError> {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(&Self::key(task_name, instance_key)) {
            record.status = status;
            record.status_message = message;
            record.stopped_at = Some(Utc::now());
        }
        Ok(())
    }

    fn remove(&self, task_name: &str, instance_key: &str) -> Result<(), LockError> {
        self.records.lock().remove(&Self::key(task_name, instance_key));
        Ok(())
    }

    fn info(&self, task_name: &str, instance_key: &str) -> Result<Option<LockInfo>, LockError> {
        Ok(self
            .records
            .lock()
            .get(&Self::key(task_name, instance_key))
            .cloned())
    }
}
