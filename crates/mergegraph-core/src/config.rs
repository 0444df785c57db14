//! Centralized configuration for MergeGraph.
//!
//! Compile-time constants live in the unit-struct groups below. Runtime
//! settings are collected once into [`Settings`] and handed to the components
//! that need them.

use crate::error::{MergeGraphError, Result};
use crate::network::RetryConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "MergeGraph";
    pub const DATA_DIR_NAME: &'static str = "mergegraph";
    pub const DB_FILE_NAME: &'static str = "graph.sqlite";
    pub const QUEUE_FILE_NAME: &'static str = "jobs.sqlite";
    pub const ENV_PREFIX: &'static str = "MERGEGRAPH_";
}

/// Model hub endpoints and conventions.
pub struct HubConfig;

impl HubConfig {
    pub const API_BASE: &'static str = "https://huggingface.co";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const LIST_PAGE_SIZE: usize = 1000;
    /// Tag carried by models produced with a merge toolkit.
    pub const MERGE_TAG: &'static str = "merge";
    /// Merge configuration file names, checked in order.
    pub const MERGE_CONFIG_FILENAMES: &'static [&'static str] =
        &["mergekit_config.yml", "merge.yml", "mergekit_moe_config.yml"];
    pub const README_FILENAMES: &'static [&'static str] = &["README.md", "readme.md"];
}

/// Graph store layout and query limits.
pub struct GraphConfig;

impl GraphConfig {
    pub const MODEL_LABEL: &'static str = "Model";
    pub const MERGED_MODEL_LABEL: &'static str = "MergedModel";
    pub const DERIVED_FROM: &'static str = "DERIVED_FROM";
    pub const DEFAULT_TEXT_INDEX_NAME: &'static str = "model_text_index";
    pub const DEFAULT_MAX_DEPTH: usize = 5;
    pub const DEFAULT_RESULTS_LIMIT: usize = 100;
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    /// Bookkeeping properties stripped once a load pass completes.
    pub const INDEXING_PROPERTIES: &'static [&'static str] = &["indexed", "indexed_at", "new_id"];
}

/// Background indexing defaults.
pub struct IndexingConfig;

impl IndexingConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const JOB_TIMEOUT: Duration = Duration::from_secs(120);
    pub const MAX_JOB_RETRIES: u32 = 3;
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const WORKER_IDLE_SLEEP: Duration = Duration::from_millis(500);
}

/// Runtime settings, constructed once at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub queue_path: PathBuf,
    pub hub_api_base: String,
    pub hub_token: Option<String>,
    pub results_dataset_dir: Option<PathBuf>,
    pub max_graph_depth: usize,
    pub results_limit: usize,
    pub native_text_search: bool,
    pub text_index_name: String,
    pub worker_count: usize,
    pub job_timeout: Duration,
    /// Fixed wave poll interval; `None` scales with the wave size.
    pub poll_interval: Option<Duration>,
    pub max_job_retries: u32,
    pub store_retry: RetryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join(AppConfig::DB_FILE_NAME),
            queue_path: data_dir.join(AppConfig::QUEUE_FILE_NAME),
            hub_api_base: HubConfig::API_BASE.to_string(),
            hub_token: None,
            results_dataset_dir: None,
            max_graph_depth: GraphConfig::DEFAULT_MAX_DEPTH,
            results_limit: GraphConfig::DEFAULT_RESULTS_LIMIT,
            native_text_search: true,
            text_index_name: GraphConfig::DEFAULT_TEXT_INDEX_NAME.to_string(),
            worker_count: IndexingConfig::DEFAULT_WORKERS,
            job_timeout: IndexingConfig::JOB_TIMEOUT,
            poll_interval: None,
            max_job_retries: IndexingConfig::MAX_JOB_RETRIES,
            store_retry: RetryConfig::store_conflicts(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(AppConfig::DATA_DIR_NAME)
}

impl Settings {
    /// Defaults overridden by `MERGEGRAPH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        let var = |name: &str| {
            lookup(&format!("{}{}", AppConfig::ENV_PREFIX, name)).filter(|v| !v.is_empty())
        };

        if let Some(v) = var("DB_PATH") {
            settings.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("QUEUE_PATH") {
            settings.queue_path = PathBuf::from(v);
        }
        if let Some(v) = var("HUB_API_BASE") {
            settings.hub_api_base = v.trim_end_matches('/').to_string();
        }
        settings.hub_token = var("HUB_TOKEN").or_else(|| lookup("HF_TOKEN").filter(|v| !v.is_empty()));
        if let Some(v) = var("RESULTS_DATASET_DIR") {
            settings.results_dataset_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("MAX_GRAPH_DEPTH") {
            settings.max_graph_depth = parse_var("MAX_GRAPH_DEPTH", &v)?;
        }
        if let Some(v) = var("RESULTS_LIMIT") {
            settings.results_limit = parse_var("RESULTS_LIMIT", &v)?;
        }
        if let Some(v) = var("NATIVE_TEXT_SEARCH") {
            settings.native_text_search = parse_bool("NATIVE_TEXT_SEARCH", &v)?;
        }
        if let Some(v) = var("TEXT_INDEX_NAME") {
            settings.text_index_name = v;
        }
        if let Some(v) = var("WORKERS") {
            settings.worker_count = parse_var::<usize>("WORKERS", &v)?.max(1);
        }
        if let Some(v) = var("JOB_TIMEOUT_SECS") {
            settings.job_timeout = Duration::from_secs(parse_var("JOB_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("POLL_INTERVAL_SECS") {
            settings.poll_interval = Some(Duration::from_secs(parse_var("POLL_INTERVAL_SECS", &v)?));
        }
        if let Some(v) = var("MAX_JOB_RETRIES") {
            settings.max_job_retries = parse_var("MAX_JOB_RETRIES", &v)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.text_index_name) {
            return Err(MergeGraphError::Config {
                message: format!("invalid text index name: {}", self.text_index_name),
            });
        }
        Ok(())
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = path.into();
        self
    }

    pub fn with_hub_api_base(mut self, base: impl Into<String>) -> Self {
        self.hub_api_base = base.into();
        self
    }

    pub fn with_hub_token(mut self, token: Option<String>) -> Self {
        self.hub_token = token;
        self
    }

    pub fn with_results_dataset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dataset_dir = Some(dir.into());
        self
    }

    pub fn with_max_graph_depth(mut self, depth: usize) -> Self {
        self.max_graph_depth = depth;
        self
    }

    pub fn with_native_text_search(mut self, enabled: bool) -> Self {
        self.native_text_search = enabled;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_max_job_retries(mut self, retries: u32) -> Self {
        self.max_job_retries = retries;
        self
    }

    pub fn with_store_retry(mut self, retry: RetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    /// Interval between job status checks for a wave of `jobs` jobs.
    pub fn wave_poll_interval(&self, jobs: usize) -> Duration {
        if let Some(interval) = self.poll_interval {
            return interval;
        }
        let secs = (jobs as u64 / 10).clamp(
            IndexingConfig::MIN_POLL_INTERVAL.as_secs(),
            IndexingConfig::MAX_POLL_INTERVAL.as_secs(),
        );
        Duration::from_secs(secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| MergeGraphError::Config {
        message: format!("{}{} has invalid value: {}", AppConfig::ENV_PREFIX, name, value),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MergeGraphError::Config {
            message: format!("{}{} is not a boolean: {}", AppConfig::ENV_PREFIX, name, value),
        }),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
