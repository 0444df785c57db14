//! Worker loops draining the job queue.

use super::executor::JobExecutor;
use super::queue::{JobQueue, JobRecord};
use super::blocking;
use crate::cancel::CancellationToken;
use crate::config::{IndexingConfig, Settings};
use crate::error::{MergeGraphError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Jobs run by one or more workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub finished: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl WorkerStats {
    fn add(&mut self, other: WorkerStats) {
        self.finished += other.finished;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
    }
}

/// Pool of tokio workers sharing one queue.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    workers: usize,
    job_timeout: Duration,
    idle_sleep: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, executor: Arc<dyn JobExecutor>, settings: &Settings) -> Self {
        Self {
            queue,
            executor,
            workers: settings.worker_count.max(1),
            job_timeout: settings.job_timeout,
            idle_sleep: IndexingConfig::WORKER_IDLE_SLEEP,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Start the workers in the background.
    ///
    /// With `burst`, each worker exits once it finds the queue empty;
    /// otherwise they run until `cancel` fires.
    pub fn spawn(&self, burst: bool, cancel: CancellationToken) -> Vec<JoinHandle<WorkerStats>> {
        info!(
            "Starting {} workers (burst: {}, job timeout: {:?})",
            self.workers, burst, self.job_timeout
        );
        (0..self.workers)
            .map(|n| {
                let pool = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.worker_loop(n, burst, cancel).await })
            })
            .collect()
    }

    /// Run the workers to completion and sum their stats.
    pub async fn run(&self, burst: bool, cancel: CancellationToken) -> Result<WorkerStats> {
        let mut total = WorkerStats::default();
        for handle in self.spawn(burst, cancel) {
            let stats = handle
                .await
                .map_err(|e| MergeGraphError::Other(format!("Worker task failed: {}", e)))?;
            total.add(stats);
        }
        Ok(total)
    }

    async fn claim(&self) -> Result<Option<JobRecord>> {
        let queue = self.queue.clone();
        blocking(move || queue.claim_next()).await
    }

    async fn worker_loop(&self, worker: usize, burst: bool, cancel: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while !cancel.is_cancelled() {
            match self.claim().await {
                Ok(Some(job)) => self.run_job(worker, job, &mut stats).await,
                Ok(None) if burst => break,
                Ok(None) => tokio::select! {
                    _ = tokio::time::sleep(self.idle_sleep) => {}
                    _ = cancel.cancelled() => break,
                },
                Err(e) => {
                    warn!("Worker {} failed to claim a job: {}", worker, e);
                    tokio::time::sleep(self.idle_sleep).await;
                }
            }
        }
        debug!("Worker {} stopped: {:?}", worker, stats);
        stats
    }

    async fn run_job(&self, worker: usize, job: JobRecord, stats: &mut WorkerStats) {
        debug!("Worker {} running job {} (attempt {})", worker, job.id, job.attempts);

        let outcome = tokio::time::timeout(self.job_timeout, self.executor.execute(&job.payload)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                stats.failed += 1;
                Some(e.to_string())
            }
            Err(_) => {
                stats.timed_out += 1;
                Some(format!("Job timed out after {:?}", self.job_timeout))
            }
        };

        let queue = self.queue.clone();
        let id = job.id.clone();
        let recorded = match &failure {
            None => {
                stats.finished += 1;
                blocking(move || queue.mark_finished(&id)).await
            }
            Some(message) => {
                warn!("Job {} failed: {}", job.id, message);
                let message = message.clone();
                blocking(move || queue.mark_failed(&id, &message)).await
            }
        };
        if let Err(e) = recorded {
            error!("Failed to record outcome of job {}: {}", job.id, e);
        }
    }
}
