//! Durable job queue in its own SQLite file.
//!
//! Several processes may share one queue file: claims run in an immediate
//! transaction so a queued job is handed to exactly one worker.

use super::{JobPayload, JobStatus};
use crate::config::GraphConfig;
use crate::error::{MergeGraphError, Result};
use crate::network::{retry_blocking, RetryConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One row of the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Times the job was claimed by a worker.
    pub attempts: u32,
    pub error: Option<String>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Job count per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
    pub dead: usize,
}

impl QueueCounts {
    pub fn pending(&self) -> usize {
        self.queued + self.started
    }
}

const JOB_COLUMNS: &str = "id, payload, status, attempts, error, enqueued_at, started_at, ended_at";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(index: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let payload: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(JobRecord {
        id: row.get(0)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(1, e))?,
        status: JobStatus::parse(&status).map_err(|e| conversion_error(2, e))?,
        attempts: row.get(3)?,
        error: row.get(4)?,
        enqueued_at: parse_timestamp(row.get(5)?),
        started_at: parse_timestamp(row.get(6)?),
        ended_at: parse_timestamp(row.get(7)?),
    })
}

fn insert_job(conn: &Connection, payload: &JobPayload, now: &str) -> Result<String> {
    let id = payload.job_id();
    conn.execute(
        "INSERT INTO jobs (id, payload, status, attempts, enqueued_at)
         VALUES (?1, ?2, 'queued', 0, ?3)
         ON CONFLICT(id) DO UPDATE SET
             payload = excluded.payload,
             status = 'queued',
             attempts = 0,
             error = NULL,
             enqueued_at = excluded.enqueued_at,
             started_at = NULL,
             ended_at = NULL
         WHERE jobs.status NOT IN ('queued', 'started')",
        params![id, serde_json::to_string(payload)?, now],
    )?;
    Ok(id)
}

/// SQLite-backed job queue.
#[derive(Clone)]
pub struct JobQueue {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
    retry: RetryConfig,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("path", &self.path).finish()
    }
}

impl JobQueue {
    pub fn open(path: impl Into<PathBuf>, retry: RetryConfig) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MergeGraphError::io_with_path(e, parent))?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn, Some(path), retry)
    }

    pub fn open_in_memory(retry: RetryConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None, retry)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>, retry: RetryConfig) -> Result<Self> {
        conn.busy_timeout(GraphConfig::BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                enqueued_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, enqueued_at);
            ",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            retry,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MergeGraphError::Database {
            message: "Failed to acquire queue lock".to_string(),
            source: None,
        })
    }

    fn with_connection<T>(&self, mut f: impl FnMut(&mut Connection) -> Result<T>) -> Result<T> {
        let (result, _) = retry_blocking(
            &self.retry,
            || {
                let mut conn = self.lock()?;
                f(&mut conn)
            },
            MergeGraphError::is_transient,
        );
        result
    }

    /// Queue one job; an existing entry with the same id is reset unless it
    /// is still pending.
    pub fn enqueue(&self, payload: &JobPayload) -> Result<String> {
        let now = timestamp(Utc::now());
        self.with_connection(|conn| insert_job(conn, payload, &now))
    }

    /// Queue several jobs in one transaction, returning their ids in order.
    pub fn enqueue_many(&self, payloads: &[JobPayload]) -> Result<Vec<String>> {
        let now = timestamp(Utc::now());
        let ids = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let ids = payloads
                .iter()
                .map(|p| insert_job(&tx, p, &now))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(ids)
        })?;
        debug!("Enqueued {} jobs", ids.len());
        Ok(ids)
    }

    /// Hand the oldest queued job to the caller, marking it started.
    pub fn claim_next(&self) -> Result<Option<JobRecord>> {
        let now = timestamp(Utc::now());
        self.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id: Option<String> = tx
                .query_row(
                    "SELECT id FROM jobs WHERE status = 'queued'
                     ORDER BY enqueued_at, rowid LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE jobs SET status = 'started', started_at = ?2, attempts = attempts + 1
                 WHERE id = ?1",
                params![id, now],
            )?;
            let job = tx.query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                row_to_job,
            )?;
            tx.commit()?;
            Ok(Some(job))
        })
    }

    fn finish(&self, id: &str, status: JobStatus, error: Option<&str>) -> Result<bool> {
        let now = timestamp(Utc::now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = ?2, error = ?3, ended_at = ?4 WHERE id = ?1",
                params![id, status.as_str(), error, now],
            )?)
        })?;
        Ok(changed > 0)
    }

    pub fn mark_finished(&self, id: &str) -> Result<bool> {
        self.finish(id, JobStatus::Finished, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<bool> {
        self.finish(id, JobStatus::Failed, Some(error))
    }

    /// Give up on a job for good.
    pub fn mark_dead(&self, id: &str) -> Result<bool> {
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = 'dead' WHERE id = ?1",
                params![id],
            )?)
        })?;
        if changed > 0 {
            warn!("Job {} moved to dead", id);
        }
        Ok(changed > 0)
    }

    /// Put a failed job back in the queue, keeping its attempt count.
    pub fn requeue(&self, id: &str) -> Result<bool> {
        let now = timestamp(Utc::now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = 'queued', enqueued_at = ?2, started_at = NULL, ended_at = NULL
                 WHERE id = ?1 AND status = 'failed'",
                params![id, now],
            )?)
        })?;
        Ok(changed > 0)
    }

    /// Fail started jobs older than `timeout`, as left behind by a worker
    /// that died mid-job.
    pub fn fail_stale(&self, timeout: Duration) -> Result<usize> {
        let timeout = chrono::Duration::from_std(timeout).map_err(|e| MergeGraphError::Config {
            message: format!("invalid job timeout: {}", e),
        })?;
        let now = Utc::now();
        let cutoff = timestamp(now - timeout);
        let now = timestamp(now);
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = 'failed', error = 'Abandoned by worker', ended_at = ?2
                 WHERE status = 'started' AND started_at < ?1",
                params![cutoff, now],
            )?)
        })?;
        if changed > 0 {
            warn!("Failed {} stale jobs", changed);
        }
        Ok(changed)
    }

    pub fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                    params![id],
                    row_to_job,
                )
                .optional()?)
        })
    }

    /// Records for `ids`; unknown ids are omitted.
    pub fn jobs(&self, ids: &[String]) -> Result<Vec<JobRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS))?;
            let mut jobs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(job) = stmt.query_row(params![id], row_to_job).optional()? {
                    jobs.push(job);
                }
            }
            Ok(jobs)
        })
    }

    pub fn failed_job_ids(&self) -> Result<Vec<String>> {
        self.ids_with_status(JobStatus::Failed)
    }

    pub fn ids_with_status(&self, status: JobStatus) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM jobs WHERE status = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map(params![status.as_str()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let rows: HashMap<String, usize> = self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok(rows)
        })?;
        let count = |status: JobStatus| rows.get(status.as_str()).copied().unwrap_or(0);
        Ok(QueueCounts {
            queued: count(JobStatus::Queued),
            started: count(JobStatus::Started),
            finished: count(JobStatus::Finished),
            failed: count(JobStatus::Failed),
            dead: count(JobStatus::Dead),
        })
    }

    /// Remove every job.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.with_connection(|conn| Ok(conn.execute("DELETE FROM jobs", [])?))?;
        info!("Cleared {} jobs", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue() -> JobQueue {
        JobQueue::open_in_memory(RetryConfig::store_conflicts()).unwrap()
    }

    #[test]
    fn test_claim_in_enqueue_order() {
        let queue = queue();
        let ids = queue
            .enqueue_many(&[JobPayload::index("A/x", None), JobPayload::index("B/y", None)])
            .unwrap();

        let first = queue.claim_next().unwrap().unwrap();
        assert_eq!(first.id, ids[0]);
        assert_eq!(first.status, JobStatus::Started);
        assert_eq!(first.attempts, 1);
        assert_eq!(queue.claim_next().unwrap().unwrap().id, ids[1]);
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_failure_requeue_and_dead() {
        let queue = queue();
        let id = queue.enqueue(&JobPayload::index("A/x", None)).unwrap();
        queue.claim_next().unwrap();
        queue.mark_failed(&id, "hub timeout").unwrap();

        assert_eq!(queue.failed_job_ids().unwrap(), vec![id.clone()]);
        let failed = queue.get(&id).unwrap().unwrap();
        assert_eq!(failed.error.as_deref(), Some("hub timeout"));

        assert!(queue.requeue(&id).unwrap());
        assert!(!queue.requeue(&id).unwrap());
        let retried = queue.claim_next().unwrap().unwrap();
        assert_eq!(retried.attempts, 2);

        queue.mark_failed(&id, "hub timeout").unwrap();
        queue.mark_dead(&id).unwrap();
        assert_eq!(queue.counts().unwrap().dead, 1);
        assert!(queue.failed_job_ids().unwrap().is_empty());
    }

    #[test]
    fn test_reenqueue_resets_only_completed_jobs() {
        let queue = queue();
        let payload = JobPayload::index("A/x", None);
        let id = queue.enqueue(&payload).unwrap();
        queue.claim_next().unwrap();

        queue.enqueue(&payload).unwrap();
        assert_eq!(queue.get(&id).unwrap().unwrap().status, JobStatus::Started);

        queue.mark_finished(&id).unwrap();
        queue.enqueue(&payload).unwrap();
        let job = queue.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_fail_stale() {
        let queue = queue();
        let id = queue.enqueue(&JobPayload::merge("C/z", "D/z")).unwrap();
        queue.claim_next().unwrap();

        assert_eq!(queue.fail_stale(Duration::from_secs(60)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.fail_stale(Duration::from_millis(1)).unwrap(), 1);
        assert_eq!(queue.get(&id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_queue_file_shared_between_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.sqlite");
        let producer = JobQueue::open(&path, RetryConfig::store_conflicts()).unwrap();
        let consumer = JobQueue::open(&path, RetryConfig::store_conflicts()).unwrap();

        let ids = producer
            .enqueue_many(&[JobPayload::index("A/x", None)])
            .unwrap();
        let job = consumer.claim_next().unwrap().unwrap();
        assert_eq!(job.id, ids[0]);
        assert!(producer.claim_next().unwrap().is_none());

        consumer.mark_finished(&job.id).unwrap();
        assert_eq!(producer.jobs(&ids).unwrap()[0].status, JobStatus::Finished);
        assert_eq!(producer.clear().unwrap(), 1);
    }
}
