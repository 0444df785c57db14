//! Dispatch of queued payloads to job bodies.

use super::index_job::{index_model_by_id, merge_renamed_models};
use super::JobPayload;
use crate::error::Result;
use crate::graph::GraphRepository;
use crate::hub::ModelHub;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs one job payload.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, payload: &JobPayload) -> Result<()>;
}

/// Executor for the indexing pipeline's jobs.
pub struct IndexingExecutor {
    hub: Arc<dyn ModelHub>,
    repo: Arc<GraphRepository>,
}

impl IndexingExecutor {
    pub fn new(hub: Arc<dyn ModelHub>, repo: Arc<GraphRepository>) -> Self {
        Self { hub, repo }
    }
}

#[async_trait]
impl JobExecutor for IndexingExecutor {
    async fn execute(&self, payload: &JobPayload) -> Result<()> {
        match payload {
            JobPayload::IndexModel {
                model_id,
                results_dir,
            } => {
                index_model_by_id(
                    self.hub.as_ref(),
                    self.repo.clone(),
                    model_id,
                    results_dir.clone(),
                )
                .await?;
            }
            JobPayload::MergeRenamed { src_id, dst_id } => {
                if !merge_renamed_models(self.repo.clone(), src_id, dst_id).await? {
                    debug!("Nothing to merge for {} -> {}", src_id, dst_id);
                }
            }
        }
        Ok(())
    }
}
