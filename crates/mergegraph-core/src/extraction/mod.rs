//! Provenance extraction.
//!
//! Each extractor is a pure function over one source (tags, card metadata,
//! merge configuration, README text). [`reconcile`] runs all of them for one
//! model and combines their outputs into a node record plus one derivation
//! edge per (extractor, base model) pair. Evidence from different extractors
//! is never collapsed, so the same base model may appear on parallel edges.

mod benchmarks;
mod card;
mod ids;
mod mergekit;
mod readme;
mod tags;

pub use benchmarks::{
    evaluated_at_from_filename, extract_benchmark_scores, load_benchmark_results, BenchmarkScores,
};
pub use card::{
    base_models_from_card_data, card_data_from_readme, card_data_string_from_readme,
    license_from_card_data, model_name_from_card_data, readme_body,
};
pub use ids::{
    author_from_id, extract_urls_from_text, filter_base_models, is_valid_repo_id,
    model_name_from_id, repo_id_from_url,
};
pub use mergekit::{
    base_models_from_mergekit_config, base_models_from_mergekit_configs,
    merge_method_from_mergekit_config, merge_method_from_mergekit_configs,
    mergekit_configs_from_readme, mergekit_configs_string_from_readme, parse_yaml_documents,
    yaml_to_json,
};
pub use readme::{description_from_readme, extract_merge_method_from_description, sanitize_description};
pub use tags::{base_models_from_tags, license_from_tags};

use crate::config::GraphConfig;
use crate::hub::{model_url, DownloadedFile, HubModelInfo};
use crate::models::{DerivedFrom, ExtractionMethod, ModelNode};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// License recorded when no source declares one.
pub const UNKNOWN_LICENSE: &str = "unknown";

/// Everything fetched for one model.
#[derive(Debug, Clone)]
pub struct ExtractionInput<'a> {
    /// Id the model was requested under.
    pub requested_id: &'a str,
    pub info: &'a HubModelInfo,
    /// URL the hub metadata was read from.
    pub info_origin: &'a str,
    pub readme: Option<&'a DownloadedFile>,
    pub merge_config: Option<&'a DownloadedFile>,
    pub benchmarks: Option<&'a BenchmarkScores>,
    pub hub_base_url: &'a str,
    pub indexed_at: DateTime<Utc>,
}

/// Node record and derivation edges for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub node: ModelNode,
    pub edges: Vec<DerivedFrom>,
}

fn base_labels() -> Vec<String> {
    vec![GraphConfig::MODEL_LABEL.to_string()]
}

/// Minimal record for a model the hub cannot resolve.
///
/// Marked `private` and already `indexed`, with no edges, so the frontier
/// walk never revisits it.
pub fn stub_node(model_id: &str, hub_base_url: &str, indexed_at: DateTime<Utc>) -> ModelNode {
    ModelNode {
        id: model_id.to_string(),
        url: is_valid_repo_id(model_id).then(|| model_url(hub_base_url, model_id)),
        name: model_name_from_id(model_id),
        author: author_from_id(model_id),
        license: Some(UNKNOWN_LICENSE.to_string()),
        private: Some(true),
        indexed: Some(true),
        indexed_at: Some(indexed_at),
        labels: base_labels(),
        ..Default::default()
    }
}

/// Combine every extractor's output for one model.
pub fn reconcile(input: &ExtractionInput<'_>) -> Extraction {
    let info = input.info;
    let requested_id = input.requested_id;

    let readme_text = input.readme.map(|f| f.content.as_str());
    let card_data: Option<Value> = readme_text
        .and_then(card_data_from_readme)
        .or_else(|| info.card_data.clone());
    let card_origin = input
        .readme
        .map(|f| f.origin.as_str())
        .unwrap_or(input.info_origin);

    let file_configs = input
        .merge_config
        .map(|f| parse_yaml_documents(&f.content))
        .unwrap_or_default();
    let readme_configs = readme_text
        .map(mergekit_configs_from_readme)
        .unwrap_or_default();
    let description = readme_text.and_then(|t| description_from_readme(readme_body(t)));

    // Edges
    let extractors: [(ExtractionMethod, Vec<String>, &str); 4] = [
        (
            ExtractionMethod::Tags,
            base_models_from_tags(&info.tags),
            input.info_origin,
        ),
        (
            ExtractionMethod::CardData,
            card_data
                .as_ref()
                .map(base_models_from_card_data)
                .unwrap_or_default(),
            card_origin,
        ),
        (
            ExtractionMethod::MergekitConfig,
            base_models_from_mergekit_configs(&file_configs),
            input
                .merge_config
                .map(|f| f.origin.as_str())
                .unwrap_or(input.info_origin),
        ),
        (
            ExtractionMethod::ReadmeYaml,
            base_models_from_mergekit_configs(&readme_configs),
            card_origin,
        ),
    ];

    let mut edges = Vec::new();
    for (method, candidates, origin) in extractors {
        for target in filter_base_models(candidates, requested_id) {
            if target == info.id {
                continue;
            }
            edges.push(DerivedFrom::new(requested_id, target, method, origin));
        }
    }

    // Node
    let merge_method = merge_method_from_mergekit_configs(&file_configs)
        .or_else(|| merge_method_from_mergekit_configs(&readme_configs))
        .or_else(|| {
            description
                .as_deref()
                .and_then(extract_merge_method_from_description)
        });
    let license = license_from_tags(&info.tags)
        .or_else(|| card_data.as_ref().and_then(license_from_card_data))
        .unwrap_or_else(|| UNKNOWN_LICENSE.to_string());

    let mut node = ModelNode {
        id: requested_id.to_string(),
        new_id: (info.id != requested_id).then(|| info.id.clone()),
        url: Some(model_url(input.hub_base_url, &info.id)),
        name: card_data
            .as_ref()
            .and_then(model_name_from_card_data)
            .or_else(|| model_name_from_id(&info.id)),
        author: info
            .author
            .clone()
            .filter(|a| !a.is_empty())
            .or_else(|| author_from_id(&info.id)),
        description,
        license: Some(license),
        merge_method,
        architecture: info.architecture(),
        likes: info.likes,
        downloads: info.downloads,
        created_at: info.created_at,
        updated_at: info.last_modified,
        private: info.private,
        disabled: info.disabled,
        gated: Some(info.is_gated()),
        indexed: Some(true),
        indexed_at: Some(input.indexed_at),
        labels: base_labels(),
        ..Default::default()
    };
    if let Some(scores) = input.benchmarks {
        scores.apply_to(&mut node);
    }
    if !edges.is_empty() || node.merge_method.is_some() {
        node.labels.push(GraphConfig::MERGED_MODEL_LABEL.to_string());
    }

    Extraction { node, edges }
}
