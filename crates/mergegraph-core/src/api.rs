//! Top-level handle wiring the hub, graph repository and job queue together.

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::error::{MergeGraphError, Result};
use crate::graph::GraphRepository;
use crate::hub::{HuggingFaceHub, ModelHub};
use crate::indexer::{IndexOptions, IndexReport, Indexer};
use crate::jobs::{IndexingExecutor, JobQueue, WorkerPool};
use crate::service::ModelService;
use std::sync::Arc;
use tracing::info;

/// Shared handles for one process.
///
/// # Example
///
/// ```rust,ignore
/// use mergegraph::{MergeGraphApi, Settings};
///
/// let api = MergeGraphApi::open(Settings::from_env()?)?;
/// let lineage = api.service().get_model_lineage("teamX/model", None)?;
/// ```
#[derive(Clone)]
pub struct MergeGraphApi {
    hub: Arc<dyn ModelHub>,
    repo: Arc<GraphRepository>,
    queue: Arc<JobQueue>,
    settings: Settings,
}

impl MergeGraphApi {
    /// Open the stores and hub client described by `settings`.
    pub fn open(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let hub = Arc::new(HuggingFaceHub::from_settings(&settings)?);
        let repo = Arc::new(GraphRepository::open(&settings)?);
        let queue = Arc::new(JobQueue::open(&settings.queue_path, settings.store_retry.clone())?);
        Ok(Self::from_parts(hub, repo, queue, settings))
    }

    /// Assemble from existing parts, e.g. an in-memory store and a fake hub.
    pub fn from_parts(
        hub: Arc<dyn ModelHub>,
        repo: Arc<GraphRepository>,
        queue: Arc<JobQueue>,
        settings: Settings,
    ) -> Self {
        Self {
            hub,
            repo,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn hub(&self) -> Arc<dyn ModelHub> {
        self.hub.clone()
    }

    pub fn repository(&self) -> Arc<GraphRepository> {
        self.repo.clone()
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }

    pub fn service(&self) -> ModelService {
        ModelService::new(self.repo.clone())
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            self.hub.clone(),
            self.repo.clone(),
            self.queue.clone(),
            self.settings.clone(),
        )
    }

    pub fn worker_pool(&self) -> WorkerPool {
        let executor = Arc::new(IndexingExecutor::new(self.hub.clone(), self.repo.clone()));
        WorkerPool::new(self.queue.clone(), executor, &self.settings)
    }

    /// Index with `workers` in-process workers draining the queue.
    ///
    /// With zero workers the queue must be drained by separate worker
    /// processes sharing the same queue file.
    pub async fn index(&self, options: &IndexOptions, workers: usize) -> Result<IndexReport> {
        let cancel = CancellationToken::new();
        let handles = if workers > 0 {
            self.worker_pool().with_workers(workers).spawn(false, cancel.clone())
        } else {
            info!("No in-process workers; waiting for external workers");
            Vec::new()
        };

        let report = self.indexer().run(options).await;

        cancel.cancel();
        for handle in handles {
            handle
                .await
                .map_err(|e| MergeGraphError::Other(format!("Worker task failed: {}", e)))?;
        }
        report
    }
}
