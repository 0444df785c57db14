//! Background jobs.
//!
//! - [`JobQueue`]: durable SQLite queue shared between the orchestrator and
//!   worker processes
//! - [`WorkerPool`]: tokio workers claiming and running queued jobs
//! - [`index_model_by_id`] / [`merge_renamed_models`]: the job bodies

mod executor;
mod index_job;
mod queue;
mod worker;

pub use executor::{IndexingExecutor, JobExecutor};
pub use index_job::{extract_model, index_model_by_id, merge_renamed_models, persist_extraction};
pub use queue::{JobQueue, JobRecord, QueueCounts};
pub use worker::{WorkerPool, WorkerStats};

use crate::error::{MergeGraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    /// Failed past the retry limit; never run again in this pass.
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(MergeGraphError::Validation {
                field: "status".into(),
                message: format!("unknown job status: {}", other),
            }),
        }
    }

    /// Still waiting for or held by a worker.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Started)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work item stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    IndexModel {
        model_id: String,
        results_dir: Option<PathBuf>,
    },
    MergeRenamed {
        src_id: String,
        dst_id: String,
    },
}

fn id_part(model_id: &str) -> String {
    model_id.replace('/', "__")
}

impl JobPayload {
    pub fn index(model_id: impl Into<String>, results_dir: Option<PathBuf>) -> Self {
        JobPayload::IndexModel {
            model_id: model_id.into(),
            results_dir,
        }
    }

    pub fn merge(src_id: impl Into<String>, dst_id: impl Into<String>) -> Self {
        JobPayload::MergeRenamed {
            src_id: src_id.into(),
            dst_id: dst_id.into(),
        }
    }

    /// Deterministic job id, so re-enqueueing the same work reuses the entry.
    pub fn job_id(&self) -> String {
        match self {
            JobPayload::IndexModel { model_id, .. } => {
                format!("index_model_by_id__{}", id_part(model_id))
            }
            JobPayload::MergeRenamed { src_id, dst_id } => format!(
                "merge_renamed_models__{}__to__{}",
                id_part(src_id),
                id_part(dst_id)
            ),
        }
    }

    /// Model id the job is about.
    pub fn model_id(&self) -> &str {
        match self {
            JobPayload::IndexModel { model_id, .. } => model_id,
            JobPayload::MergeRenamed { src_id, .. } => src_id,
        }
    }
}

/// Run blocking store work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MergeGraphError::Other(format!("Blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids() {
        assert_eq!(
            JobPayload::index("teamX/model-7b", None).job_id(),
            "index_model_by_id__teamX__model-7b"
        );
        assert_eq!(
            JobPayload::merge("a/b", "c/d").job_id(),
            "merge_renamed_models__a__b__to__c__d"
        );
    }

    #[test]
    fn test_payload_serialization() {
        let payload = JobPayload::merge("C/z", "D/z");
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"merge_renamed","src_id":"C/z","dst_id":"D/z"}"#
        );
        assert_eq!(serde_json::from_str::<JobPayload>(&json).unwrap(), payload);
    }

    #[test]
    fn test_status_parse() {
        for status in [
            JobStatus::Queued,
            JobStatus::Started,
            JobStatus::Finished,
            JobStatus::Failed,
            JobStatus::Dead,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("deferred").is_err());
        assert!(JobStatus::Started.is_pending());
        assert!(!JobStatus::Dead.is_pending());
    }
}
