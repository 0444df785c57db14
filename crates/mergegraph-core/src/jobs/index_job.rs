//! Job bodies: index one model, fold a renamed model into its new id.

use super::blocking;
use crate::config::{GraphConfig, HubConfig};
use crate::error::Result;
use crate::extraction::{
    extract_benchmark_scores, reconcile, stub_node, BenchmarkScores, Extraction, ExtractionInput,
};
use crate::graph::GraphRepository;
use crate::hub::{download_first, resolve_model_info, ModelHub};
use chrono::Utc;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

async fn load_scores(results_dir: &Path, ids: Vec<String>) -> Result<Option<BenchmarkScores>> {
    let dir = results_dir.to_path_buf();
    blocking(move || {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        extract_benchmark_scores(&dir, &ids)
    })
    .await
}

/// Compute the node record and derivation edges for `model_id`.
///
/// Reads only from the hub and the benchmark results directory. A model the
/// hub cannot resolve yields a private stub node without edges.
pub async fn extract_model(
    hub: &dyn ModelHub,
    model_id: &str,
    results_dir: Option<&Path>,
) -> Result<Extraction> {
    let indexed_at = Utc::now();
    let Some(resolved) = resolve_model_info(hub, model_id, true, true).await? else {
        debug!("Model {} is unresolvable, storing stub", model_id);
        return Ok(Extraction {
            node: stub_node(model_id, hub.base_url(), indexed_at),
            edges: Vec::new(),
        });
    };
    let info = &resolved.info;

    let readme = download_first(hub, &info.id, HubConfig::README_FILENAMES, &info.siblings).await?;
    let merge_config =
        download_first(hub, &info.id, HubConfig::MERGE_CONFIG_FILENAMES, &info.siblings).await?;

    let benchmarks = match results_dir {
        Some(dir) => {
            let mut ids = vec![model_id.to_string()];
            if info.id != model_id {
                ids.push(info.id.clone());
            }
            load_scores(dir, ids).await?
        }
        None => None,
    };

    Ok(reconcile(&ExtractionInput {
        requested_id: model_id,
        info,
        info_origin: &resolved.origin,
        readme: readme.as_ref(),
        merge_config: merge_config.as_ref(),
        benchmarks: benchmarks.as_ref(),
        hub_base_url: hub.base_url(),
        indexed_at,
    }))
}

/// Write an extraction: upsert the node, make sure every edge target exists
/// (as an unindexed stub when new), then add the edges.
///
/// Re-running with the same extraction leaves the graph unchanged.
pub fn persist_extraction(repo: &GraphRepository, extraction: &Extraction) -> Result<()> {
    repo.upsert_model(&extraction.node)?;

    let mut stub = Map::new();
    stub.insert("indexed".into(), Value::Bool(false));
    let labels = vec![GraphConfig::MODEL_LABEL.to_string()];

    for edge in &extraction.edges {
        if repo.create_if_absent(&edge.target, &stub, &labels)? {
            debug!("Discovered base model {}", edge.target);
        }
        repo.merge_relationship(
            &edge.source,
            &edge.target,
            GraphConfig::DERIVED_FROM,
            &edge.properties(),
        )?;
    }
    Ok(())
}

/// Index one model: extract from the hub, then persist.
pub async fn index_model_by_id(
    hub: &dyn ModelHub,
    repo: Arc<GraphRepository>,
    model_id: &str,
    results_dir: Option<PathBuf>,
) -> Result<Extraction> {
    let extraction = extract_model(hub, model_id, results_dir.as_deref()).await?;

    let to_persist = extraction.clone();
    blocking(move || persist_extraction(&repo, &to_persist)).await?;

    info!(
        "Indexed {} with {} derivation edges{}",
        model_id,
        extraction.edges.len(),
        extraction
            .node
            .new_id
            .as_deref()
            .map(|new_id| format!(" (renamed to {})", new_id))
            .unwrap_or_default()
    );
    Ok(extraction)
}

/// Fold the node of a renamed model into its current id.
pub async fn merge_renamed_models(
    repo: Arc<GraphRepository>,
    src_id: &str,
    dst_id: &str,
) -> Result<bool> {
    let (src, dst) = (src_id.to_string(), dst_id.to_string());
    blocking(move || repo.merge_nodes(&src, &dst)).await
}
