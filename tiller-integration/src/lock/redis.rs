use super::{AcquireOutcome, LockError, LockInfo, LockStatus, TaskLockManager, new_lock_info};
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

/// Redis-backed lock manager used in production.
///
/// Records are JSON values at `{prefix}:{task_name}:{instance_key}`; acquisition is atomic via
/// `SET NX`. Heartbeats and stop requests are plain read-modify-write cycles - the lock is
/// best-effort by contract, and single ownership makes holder-side writes race-free.
#[derive(Debug, Clone)]
pub struct RedisLockManager {
    client: redis::Client,
    prefix: String,
}

impl RedisLockManager {
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, LockError> {
        redis::Client::open(url)
            .map(|client| Self {
                client,
                prefix: prefix.into(),
            })
            .map_err(|err| LockError::Transport(err.to_string()))
    }

    fn key(&self, task_name: &str, instance_key: &str) -> String {
        format!("{}:{}:{}", self.prefix, task_name, instance_key)
    }

    fn connection(&self) -> Result<redis::Connection, LockError> {
        self.client
            .get_connection()
            .map_err(|err| LockError::Transport(err.to_string()))
    }

    fn read(
        conn: &mut redis::Connection,
        key: &str,
    ) -> Result<Option<LockInfo>, LockError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query(conn)
            .map_err(|err| LockError::Transport(err.to_string()))?;

        raw.map(|json| serde_json::from_str(&json).map_err(|err| LockError::Codec(err.to_string())))
            .transpose()
    }

    fn write(
        conn: &mut redis::Connection,
        key: &str,
        info: &LockInfo,
    ) -> Result<(), LockError> {
        let json =
            serde_json::to_string(info).map_err(|err| LockError::Codec(err.to_string()))?;
        redis::cmd("SET")
            .arg(key)
            .arg(json)
            .query::<()>(conn)
            .map_err(|err| LockError::Transport(err.to_string()))
    }
}

impl TaskLockManager for RedisLockManager {
    fn acquire(
        &self,
        task_name: &str,
        instance_key: &str,
        worker_id: &str,
        meta: Value,
        stale_threshold: Duration,
    ) -> Result<AcquireOutcome, LockError> {
        let now = Utc::now();
        let key = self.key(task_name, instance_key);
        let mut conn = self.connection()?;

        let record = new_lock_info(task_name, instance_key, worker_id, meta, now);
        let json =
            serde_json::to_string(&record).map_err(|err| LockError::Codec(err.to_string()))?;

        // SET NX claims a key nobody holds; on refusal, inspect the existing record.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("NX")
            .query(&mut conn)
            .map_err(|err| LockError::Transport(err.to_string()))?;
        if claimed.is_some() {
            return Ok(AcquireOutcome::Acquired);
        }

        match Self::read(&mut conn, &key)? {
            // Record vanished between SET NX and GET; claim it outright.
            None => {
                Self::write(&mut conn, &key, &record)?;
                Ok(AcquireOutcome::Acquired)
            }
            Some(existing) if existing.status.is_terminal() => {
                Self::write(&mut conn, &key, &record)?;
                Ok(AcquireOutcome::Acquired)
            }
            Some(existing) if existing.is_stale(now, stale_threshold) => {
                Ok(AcquireOutcome::Stale(existing))
            }
            Some(existing) => Ok(AcquireOutcome::Held(existing)),
        }
    }

    fn heartbeat(
        &self,
        task_name: &str,
        instance_key: &str,
        worker_id: &str,
        status_message: Option<String>,
        meta_update: Option<Value>,
    ) -> Result<bool, LockError> {
        let key = self.key(task_name, instance_key);
        let mut conn = self.connection()?;

        let Some(mut record) = Self::read(&mut conn, &key)? else {
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
        Self::write(&mut conn, &key, &record)?;
        Ok(true)
    }

    fn request_stop(
        &self,
        task_name: &str,
        instance_key: &str,
        message: &str,
    ) -> Result<bool, LockError> {
        let key = self.key(task_name, instance_key);
        let mut conn = self.connection()?;

        let Some(mut record) = Self::read(&mut conn, &key)? else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        record.status = LockStatus::StopRequested;
        record.status_message = Some(message.to_string());
        record.last_heartbeat_at = Utc::now();
        Self::write(&mut conn, &key, &record)?;
        Ok(true)
    }

    fn release(
        &self,
        task_name: &str,
        instance_key: &str,
        status: LockStatus,
        message: Option<String>,
    ) -> Result<(), LockError> {
        let key = self.key(task_name, instance_key);
        let mut conn = self.connection()?;

        if let Some(mut record) = Self::read(&mut conn, &key)? {
            record.status = status;
            record.status_message = message;
            record.stopped_at = Some(Utc::now());
            Self::write(&mut conn, &key, &record)?;
        }
        Ok(())
    }

    fn remove(&self, task_name: &str, instance_key: &str) -> Result<(), LockError> {
        let key = self.key(task_name, instance_key);
        let mut conn = self.connection()?;
        redis::cmd("DEL")
            .arg(key)
            .query::<()>(&mut conn)
            .map_err(|err| LockError::Transport(err.to_string()))
    }

    fn info(&self, task_name: &str, instance_key: &str) -> Result<Option<LockInfo>, LockError> {
        let key = self.key(task_name, instance_key);
        let mut conn = self.connection()?;
        Self::read(&mut conn, &key)
    }
}
