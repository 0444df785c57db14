//! Shared fixtures for integration tests: an in-process hub and on-disk stores.

#![allow(dead_code)]

use async_trait::async_trait;
use mergegraph::error::{MergeGraphError, Result};
use mergegraph::hub::{HubModelInfo, ListModelsParams, ModelHub, RepoSibling};
use mergegraph::{GraphRepository, JobQueue, MergeGraphApi, Settings};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const BASE_URL: &str = "https://hub.test";

/// Hub serving a fixed set of models and files.
#[derive(Default)]
pub struct FakeHub {
    /// Requested id -> metadata; a different `info.id` models a rename.
    pub infos: HashMap<String, HubModelInfo>,
    pub files: HashMap<(String, String), String>,
    pub merged: Vec<String>,
    pub info_calls: AtomicUsize,
}

impl FakeHub {
    pub fn with_model(mut self, requested_id: &str, info: HubModelInfo) -> Self {
        self.infos.insert(requested_id.to_string(), info);
        self
    }

    pub fn with_file(mut self, model_id: &str, filename: &str, content: &str) -> Self {
        self.files
            .insert((model_id.to_string(), filename.to_string()), content.to_string());
        self
    }

    pub fn with_merged(mut self, ids: &[&str]) -> Self {
        self.merged = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[async_trait]
impl ModelHub for FakeHub {
    async fn list_models(&self, params: &ListModelsParams) -> Result<Vec<HubModelInfo>> {
        let mut models: Vec<HubModelInfo> = self
            .merged
            .iter()
            .filter_map(|id| self.infos.get(id).cloned())
            .collect();
        if let Some(limit) = params.limit {
            models.truncate(limit);
        }
        Ok(models)
    }

    async fn model_info(&self, model_id: &str) -> Result<HubModelInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.infos
            .get(model_id)
            .cloned()
            .ok_or_else(|| MergeGraphError::HubNotFound {
                model_id: model_id.to_string(),
            })
    }

    async fn download_file(&self, model_id: &str, filename: &str) -> Result<String> {
        self.files
            .get(&(model_id.to_string(), filename.to_string()))
            .cloned()
            .ok_or_else(|| MergeGraphError::HubNotFound {
                model_id: model_id.to_string(),
            })
    }

    async fn whoami(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn base_url(&self) -> &str {
        BASE_URL
    }
}

pub fn model(id: &str, tags: &[&str], files: &[&str]) -> HubModelInfo {
    HubModelInfo {
        id: id.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        siblings: files
            .iter()
            .map(|f| RepoSibling {
                rfilename: f.to_string(),
            })
            .collect(),
        config: Some(json!({"architectures": ["MistralForCausalLM"]})),
        ..Default::default()
    }
}

/// Lineage used across tests:
///
/// - `A/x` is a slerp merge of `B/y` (tag and config) and `C/z` (config)
/// - `B/y` no longer exists on the hub
/// - `C/z` was renamed to `D/z` and is a fine-tune of `E/w`
pub fn lineage_hub() -> FakeHub {
    let mut a = model(
        "A/x",
        &["merge", "base_model:B/y", "license:apache-2.0"],
        &["README.md", "mergekit_config.yml"],
    );
    a.likes = Some(10);
    let mut e = model("E/w", &["license:mit"], &[]);
    e.likes = Some(3);

    FakeHub::default()
        .with_model("A/x", a)
        .with_model("C/z", model("D/z", &["base_model:E/w"], &[]))
        .with_model("E/w", e)
        .with_file(
            "A/x",
            "README.md",
            "---\nlicense: apache-2.0\n---\n# A/x\n\nA slerp merge of two chat models.\n",
        )
        .with_file(
            "A/x",
            "mergekit_config.yml",
            "slices:\n  - sources:\n      - model: B/y\n        layer_range: [0, 32]\n      - model: C/z\n        layer_range: [0, 32]\nmerge_method: slerp\nbase_model: B/y\n",
        )
        .with_merged(&["A/x"])
}

/// Settings pointing at fresh files under a temporary directory.
pub fn test_settings(dir: &TempDir) -> Settings {
    Settings::default()
        .with_db_path(dir.path().join("graph.db"))
        .with_queue_path(dir.path().join("queue.db"))
        .with_hub_api_base(BASE_URL)
        .with_worker_count(2)
        .with_job_timeout(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(20))
}

pub fn test_api(hub: FakeHub) -> (TempDir, MergeGraphApi) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let settings = test_settings(&dir);
    let repo = Arc::new(GraphRepository::open(&settings).unwrap());
    let queue = Arc::new(JobQueue::open(&settings.queue_path, settings.store_retry.clone()).unwrap());
    let api = MergeGraphApi::from_parts(Arc::new(hub), repo, queue, settings);
    (dir, api)
}
