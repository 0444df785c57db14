//! Breadth-first indexing pass over the model graph.
//!
//! Starting from the hub's merged models, every wave enqueues one index job
//! per frontier model and waits for the wave to drain. Indexing discovers
//! base models as unindexed stub nodes; those form the next frontier. When no
//! unindexed nodes remain, renamed models are folded into their current ids
//! and the bookkeeping properties are stripped.

use crate::config::{GraphConfig, HubConfig, Settings};
use crate::error::Result;
use crate::graph::{Filters, GraphRepository};
use crate::hub::{ListModelsParams, ModelHub};
use crate::jobs::{blocking, JobPayload, JobQueue, JobStatus};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options of one indexing pass.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Maximum number of seed models fetched from the hub.
    pub limit: Option<usize>,
    /// Keep the existing graph instead of starting empty.
    pub keep_db: bool,
    /// Explicit seed ids instead of the hub's merged-model listing.
    pub seed: Option<Vec<String>>,
}

/// Summary of an indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub waves: usize,
    pub models_indexed: usize,
    pub jobs_retried: usize,
    /// Jobs that failed past the retry limit.
    pub poisoned_jobs: Vec<String>,
    pub renamed: usize,
    pub nodes: usize,
    pub relationships: usize,
}

#[derive(Debug, Default)]
struct WaveOutcome {
    retried: usize,
    dead: Vec<(String, String)>,
}

/// Indexing orchestrator.
pub struct Indexer {
    hub: Arc<dyn ModelHub>,
    repo: Arc<GraphRepository>,
    queue: Arc<JobQueue>,
    settings: Settings,
}

impl Indexer {
    pub fn new(
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

    async fn seed_ids(&self, options: &IndexOptions) -> Result<BTreeSet<String>> {
        if let Some(seed) = &options.seed {
            return Ok(seed.iter().cloned().collect());
        }
        let params = ListModelsParams::by_tag(HubConfig::MERGE_TAG).with_limit(options.limit);
        let models = self.hub.list_models(&params).await?;
        info!("Found {} merged models on the hub", models.len());
        Ok(models.into_iter().map(|m| m.id).collect())
    }

    /// Enqueue `payloads` and wait until none is pending, requeueing failed
    /// jobs until their attempts exceed the retry limit.
    async fn run_wave(&self, payloads: Vec<JobPayload>) -> Result<WaveOutcome> {
        let mut outcome = WaveOutcome::default();
        if payloads.is_empty() {
            return Ok(outcome);
        }
        let model_ids: BTreeMap<String, String> = payloads
            .iter()
            .map(|p| (p.job_id(), p.model_id().to_string()))
            .collect();

        let queue = self.queue.clone();
        let ids = blocking(move || queue.enqueue_many(&payloads)).await?;
        let interval = self.settings.wave_poll_interval(ids.len());
        let stale_after = self.settings.job_timeout * 2;
        let max_attempts = self.settings.max_job_retries + 1;

        loop {
            tokio::time::sleep(interval).await;

            let queue = self.queue.clone();
            let wave = ids.clone();
            let jobs = blocking(move || {
                queue.fail_stale(stale_after)?;
                queue.jobs(&wave)
            })
            .await?;

            let mut pending = 0;
            for job in &jobs {
                match job.status {
                    JobStatus::Queued | JobStatus::Started => pending += 1,
                    JobStatus::Failed if job.attempts < max_attempts => {
                        let queue = self.queue.clone();
                        let id = job.id.clone();
                        if blocking(move || queue.requeue(&id)).await? {
                            debug!("Retrying job {} (attempt {})", job.id, job.attempts + 1);
                            outcome.retried += 1;
                            pending += 1;
                        }
                    }
                    JobStatus::Failed => {
                        let queue = self.queue.clone();
                        let id = job.id.clone();
                        blocking(move || queue.mark_dead(&id)).await?;
                        let model_id = model_ids.get(&job.id).cloned().unwrap_or_default();
                        outcome.dead.push((job.id.clone(), model_id));
                    }
                    JobStatus::Finished | JobStatus::Dead => {}
                }
            }

            debug!("{} of {} jobs pending", pending, jobs.len());
            if pending == 0 {
                return Ok(outcome);
            }
        }
    }

    /// Ids of nodes created as edge targets and not indexed yet.
    async fn unindexed_ids(&self) -> Result<BTreeSet<String>> {
        let repo = self.repo.clone();
        let nodes = blocking(move || {
            let filters = Filters::from([("indexed".to_string(), Value::Bool(false))]);
            repo.list_nodes(None, &filters, None)
        })
        .await?;
        Ok(nodes.into_iter().map(|n| n.id).collect())
    }

    /// `(old id, current id)` pairs, with rename chains resolved to their
    /// final id. Cyclic renames are dropped.
    async fn renames(&self) -> Result<Vec<(String, String)>> {
        let repo = self.repo.clone();
        let nodes = blocking(move || repo.nodes_with_property("new_id")).await?;
        let direct: BTreeMap<String, String> = nodes
            .into_iter()
            .filter_map(|n| {
                let new_id = n.property("new_id")?.as_str()?.to_string();
                (new_id != n.id).then_some((n.id, new_id))
            })
            .collect();

        Ok(direct
            .keys()
            .map(|old| {
                let mut current = &direct[old];
                let mut seen = BTreeSet::from([old]);
                while let Some(next) = direct.get(current) {
                    if !seen.insert(current) {
                        break;
                    }
                    current = next;
                }
                (old.clone(), current.clone())
            })
            .filter(|(old, current)| old != current)
            .collect())
    }

    /// Run a complete indexing pass.
    pub async fn run(&self, options: &IndexOptions) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        if !options.keep_db {
            let repo = self.repo.clone();
            let queue = self.queue.clone();
            blocking(move || {
                repo.delete_all()?;
                queue.clear()
            })
            .await?;
        }

        let mut frontier = self.seed_ids(options).await?;
        let mut processed: BTreeSet<String> = BTreeSet::new();
        let mut poisoned: BTreeSet<String> = BTreeSet::new();
        let results_dir = self.settings.results_dataset_dir.clone();

        while !frontier.is_empty() {
            report.waves += 1;
            info!("Wave {}: indexing {} models", report.waves, frontier.len());

            let payloads = frontier
                .iter()
                .map(|id| JobPayload::index(id.clone(), results_dir.clone()))
                .collect();
            let outcome = self.run_wave(payloads).await?;
            report.jobs_retried += outcome.retried;
            for (job_id, model_id) in outcome.dead {
                warn!("Giving up on {} after repeated failures", model_id);
                report.poisoned_jobs.push(job_id);
                poisoned.insert(model_id);
            }

            report.models_indexed += frontier.len();
            processed.append(&mut frontier);
            frontier = self
                .unindexed_ids()
                .await?
                .into_iter()
                .filter(|id| !processed.contains(id) && !poisoned.contains(id))
                .collect();
        }

        let renames = self.renames().await?;
        if !renames.is_empty() {
            info!("Merging {} renamed models", renames.len());
            let payloads = renames
                .iter()
                .map(|(old, current)| JobPayload::merge(old.clone(), current.clone()))
                .collect();
            let outcome = self.run_wave(payloads).await?;
            report.jobs_retried += outcome.retried;
            report
                .poisoned_jobs
                .extend(outcome.dead.into_iter().map(|(job_id, _)| job_id));
            report.renamed = renames.len();
        }

        let repo = self.repo.clone();
        let (nodes, relationships) = blocking(move || {
            repo.remove_properties(GraphConfig::INDEXING_PROPERTIES, None)?;
            Ok((
                repo.count_nodes(None, &Filters::new())?,
                repo.list_relationships(None, None, None)?.len(),
            ))
        })
        .await?;
        report.nodes = nodes;
        report.relationships = relationships;

        info!(
            "Indexing finished: {} waves, {} models, {} nodes, {} relationships, {} poisoned jobs",
            report.waves,
            report.models_indexed,
            report.nodes,
            report.relationships,
            report.poisoned_jobs.len()
        );
        Ok(report)
    }
}
