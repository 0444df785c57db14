//! Benchmark results from a local evaluation dataset.
//!
//! The dataset holds one directory per model id with timestamped result files
//! such as `results_2023-09-08T23-38-08.931556.json`, each carrying a
//! `results` map keyed by harness task.

use crate::error::{MergeGraphError, Result};
use crate::models::ModelNode;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static BARE_NON_FINITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\b(?:NaN|Infinity)\b").unwrap());

const ARC_TASK: &str = "harness|arc:challenge|25";
const HELLASWAG_TASK: &str = "harness|hellaswag|10";
const MMLU_TASK_PREFIX: &str = "harness|hendrycksTest-";
const MMLU_TASK_SUFFIX: &str = "|5";
const TRUTHFULQA_TASK: &str = "harness|truthfulqa:mc|0";
const WINOGRANDE_TASK: &str = "harness|winogrande|5";
const GSM8K_TASK: &str = "harness|gsm8k|5";

/// Scores for one model; absent metrics are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchmarkScores {
    pub arc_score: Option<f64>,
    pub hella_swag_score: Option<f64>,
    pub mmlu_score: Option<f64>,
    pub truthfulqa_score: Option<f64>,
    pub winogrande_score: Option<f64>,
    pub gsm8k_score: Option<f64>,
    pub average_score: Option<f64>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl BenchmarkScores {
    /// Compute scores from a merged `results` map.
    pub fn from_results(results: &Map<String, Value>, evaluated_at: Option<DateTime<Utc>>) -> Self {
        let metric = |task: &str, key: &str| {
            results
                .get(task)
                .and_then(|r| r.get(key))
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite())
        };

        let mmlu: Vec<f64> = results
            .iter()
            .filter(|(task, _)| {
                task.starts_with(MMLU_TASK_PREFIX) && task.ends_with(MMLU_TASK_SUFFIX)
            })
            .filter_map(|(_, r)| r.get("acc_norm").and_then(Value::as_f64))
            .collect();
        let mmlu_score = (!mmlu.is_empty())
            .then(|| mmlu.iter().sum::<f64>() / mmlu.len() as f64)
            .filter(|v| v.is_finite());

        let mut scores = Self {
            arc_score: metric(ARC_TASK, "acc_norm"),
            hella_swag_score: metric(HELLASWAG_TASK, "acc_norm"),
            mmlu_score,
            truthfulqa_score: metric(TRUTHFULQA_TASK, "mc2"),
            winogrande_score: metric(WINOGRANDE_TASK, "acc"),
            gsm8k_score: metric(GSM8K_TASK, "acc"),
            average_score: None,
            evaluated_at,
        };

        let present: Vec<f64> = scores.metrics().into_iter().flatten().collect();
        if !present.is_empty() {
            scores.average_score = Some(present.iter().sum::<f64>() / present.len() as f64);
        }
        scores
    }

    fn metrics(&self) -> [Option<f64>; 6] {
        [
            self.arc_score,
            self.hella_swag_score,
            self.mmlu_score,
            self.truthfulqa_score,
            self.winogrande_score,
            self.gsm8k_score,
        ]
    }

    /// Copy the scores onto a node record.
    pub fn apply_to(&self, node: &mut ModelNode) {
        node.arc_score = self.arc_score;
        node.hella_swag_score = self.hella_swag_score;
        node.mmlu_score = self.mmlu_score;
        node.truthfulqa_score = self.truthfulqa_score;
        node.winogrande_score = self.winogrande_score;
        node.gsm8k_score = self.gsm8k_score;
        node.average_score = self.average_score;
        node.evaluated_at = self.evaluated_at;
    }
}

/// Parse the timestamp encoded in a result file stem.
///
/// `results_2023-09-08T23-38-08.931556` becomes `2023-09-08T23:38:08.931556Z`.
pub fn evaluated_at_from_filename(stem: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = stem.split('_').collect();
    let [_, stamp] = parts.as_slice() else {
        return None;
    };
    let (date, time) = stamp.split_once('T')?;
    let iso = format!("{}T{}", date, time.replace('-', ":"));
    NaiveDateTime::parse_from_str(&iso, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

fn result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| MergeGraphError::io_with_path(e, dir))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_result = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("results") && n.ends_with(".json"));
        if is_result && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load and merge every result file of `model_id`.
///
/// Later files override earlier ones per task. Returns `Ok(None)` when the
/// model has no result directory or no usable results.
pub fn load_benchmark_results(
    dataset_dir: &Path,
    model_id: &str,
) -> Result<Option<(Map<String, Value>, Option<DateTime<Utc>>)>> {
    let dir = dataset_dir.join(model_id);
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut merged = Map::new();
    let mut last_stem = None;
    for file in result_files(&dir)? {
        let text =
            std::fs::read_to_string(&file).map_err(|e| MergeGraphError::io_with_path(e, &file))?;
        let text = BARE_NON_FINITE.replace_all(&text, "null");
        let loaded: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping malformed results file {}: {}", file.display(), e);
                continue;
            }
        };
        if let Some(results) = loaded.get("results").and_then(Value::as_object) {
            merged.extend(results.clone());
        }
        last_stem = file.file_stem().and_then(|s| s.to_str()).map(str::to_string);
    }

    if merged.is_empty() {
        return Ok(None);
    }
    let evaluated_at = last_stem.as_deref().and_then(evaluated_at_from_filename);
    debug!("Loaded {} benchmark tasks for {}", merged.len(), model_id);
    Ok(Some((merged, evaluated_at)))
}

/// Scores for the first of `model_ids` that has results.
pub fn extract_benchmark_scores(
    dataset_dir: &Path,
    model_ids: &[&str],
) -> Result<Option<BenchmarkScores>> {
    for model_id in model_ids {
        if let Some((results, evaluated_at)) = load_benchmark_results(dataset_dir, model_id)? {
            return Ok(Some(BenchmarkScores::from_results(&results, evaluated_at)));
        }
    }
    Ok(None)
}
