//! Read-side queries used by the CLI and other front ends.

use crate::config::GraphConfig;
use crate::error::{MergeGraphError, Result};
use crate::graph::{Filters, GraphRepository, ListModelsQuery, SortOrder, TraversalFilter};
use crate::models::{Graph, ModelNode};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Sort options for model listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Oldest first.
    #[default]
    Default,
    MostLikes,
    MostDownloads,
    RecentlyCreated,
    RecentlyUpdated,
    AverageScore,
    Arc,
    HellaSwag,
    Mmlu,
    TruthfulQa,
    Winogrande,
    Gsm8k,
}

impl SortBy {
    pub const ALL: &'static [SortBy] = &[
        SortBy::Default,
        SortBy::MostLikes,
        SortBy::MostDownloads,
        SortBy::RecentlyCreated,
        SortBy::RecentlyUpdated,
        SortBy::AverageScore,
        SortBy::Arc,
        SortBy::HellaSwag,
        SortBy::Mmlu,
        SortBy::TruthfulQa,
        SortBy::Winogrande,
        SortBy::Gsm8k,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Default => "default",
            SortBy::MostLikes => "most likes",
            SortBy::MostDownloads => "most downloads",
            SortBy::RecentlyCreated => "recently created",
            SortBy::RecentlyUpdated => "recently updated",
            SortBy::AverageScore => "average score",
            SortBy::Arc => "ARC",
            SortBy::HellaSwag => "HellaSwag",
            SortBy::Mmlu => "MMLU",
            SortBy::TruthfulQa => "TruthfulQA",
            SortBy::Winogrande => "Winogrande",
            SortBy::Gsm8k => "GSM8k",
        }
    }

    /// Property and direction the option sorts by.
    pub fn sort_key(&self) -> (&'static str, SortOrder) {
        match self {
            SortBy::Default => ("created_at", SortOrder::Asc),
            SortBy::MostLikes => ("likes", SortOrder::Desc),
            SortBy::MostDownloads => ("downloads", SortOrder::Desc),
            SortBy::RecentlyCreated => ("created_at", SortOrder::Desc),
            SortBy::RecentlyUpdated => ("updated_at", SortOrder::Desc),
            SortBy::AverageScore => ("average_score", SortOrder::Desc),
            SortBy::Arc => ("arc_score", SortOrder::Desc),
            SortBy::HellaSwag => ("hella_swag_score", SortOrder::Desc),
            SortBy::Mmlu => ("mmlu_score", SortOrder::Desc),
            SortBy::TruthfulQa => ("truthfulqa_score", SortOrder::Desc),
            SortBy::Winogrande => ("winogrande_score", SortOrder::Desc),
            SortBy::Gsm8k => ("gsm8k_score", SortOrder::Desc),
        }
    }
}

impl FromStr for SortBy {
    type Err = MergeGraphError;

    /// Accepts the display names, case-insensitively, with `-` or `_` for spaces.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace(['-', '_'], " ");
        SortBy::ALL
            .iter()
            .find(|option| option.as_str().to_lowercase() == wanted)
            .copied()
            .ok_or_else(|| MergeGraphError::Validation {
                field: "sort_by".into(),
                message: format!("unknown sort option: {}", s),
            })
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Models to leave out of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclude {
    Private,
    Gated,
    BaseModels,
    MergedModels,
}

impl Exclude {
    pub const ALL: &'static [Exclude] = &[
        Exclude::Private,
        Exclude::Gated,
        Exclude::BaseModels,
        Exclude::MergedModels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exclude::Private => "private",
            Exclude::Gated => "gated",
            Exclude::BaseModels => "base models",
            Exclude::MergedModels => "merged models",
        }
    }
}

impl FromStr for Exclude {
    type Err = MergeGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace(['-', '_'], " ");
        Exclude::ALL
            .iter()
            .find(|option| option.as_str() == wanted)
            .copied()
            .ok_or_else(|| MergeGraphError::Validation {
                field: "exclude".into(),
                message: format!("unknown exclude option: {}", s),
            })
    }
}

impl fmt::Display for Exclude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of [`ModelService::list_models`].
#[derive(Debug, Clone, Default)]
pub struct ModelListRequest {
    pub query: Option<String>,
    pub sort_by: SortBy,
    pub exclude: Option<Exclude>,
    pub license: Option<String>,
    pub merge_method: Option<String>,
    pub architecture: Option<String>,
    pub base_model: Option<String>,
    pub limit: Option<usize>,
}

/// Model queries over the graph repository.
#[derive(Clone)]
pub struct ModelService {
    repo: Arc<GraphRepository>,
}

fn strings(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

impl ModelService {
    pub fn new(repo: Arc<GraphRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &GraphRepository {
        &self.repo
    }

    /// Neighborhood of a model: its bases, their bases, and sibling merges.
    ///
    /// `max_depth` defaults to the repository's configured depth.
    pub fn get_model_lineage(&self, model_id: &str, max_depth: Option<usize>) -> Result<Graph> {
        self.repo.get_sub_graph(
            model_id,
            &TraversalFilter {
                label: Some(GraphConfig::MODEL_LABEL),
                rel_type: None,
                max_depth: Some(max_depth.unwrap_or(self.repo.options().max_depth)),
            },
        )
    }

    /// Filtered, sorted listing. Descending sorts leave out models without a
    /// value for the sort key.
    pub fn list_models(&self, request: &ModelListRequest) -> Result<Vec<ModelNode>> {
        let (label, not_label) = match request.exclude {
            Some(Exclude::BaseModels) => (GraphConfig::MERGED_MODEL_LABEL, None),
            Some(Exclude::MergedModels) => (
                GraphConfig::MODEL_LABEL,
                Some(GraphConfig::MERGED_MODEL_LABEL.to_string()),
            ),
            _ => (GraphConfig::MODEL_LABEL, None),
        };
        let mut exclude = Filters::new();
        match request.exclude {
            Some(Exclude::Private) => {
                exclude.insert("private".into(), Value::Bool(true));
            }
            Some(Exclude::Gated) => {
                exclude.insert("gated".into(), Value::Bool(true));
            }
            _ => {}
        }

        let mut filters = Filters::new();
        for (key, value) in [
            ("license", &request.license),
            ("merge_method", &request.merge_method),
            ("architecture", &request.architecture),
        ] {
            if let Some(value) = value {
                filters.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        let (sort_key, sort_order) = request.sort_by.sort_key();
        self.repo.list_models(&ListModelsQuery {
            query: request.query.clone().filter(|q| !q.trim().is_empty()),
            label: Some(label.to_string()),
            not_label,
            sort_key: Some(sort_key.to_string()),
            sort_order,
            exclude_null_on_sort_key: sort_order == SortOrder::Desc,
            filters,
            exclude,
            base_model: request.base_model.clone(),
            limit: request.limit,
        })
    }

    /// Model ids, optionally only public or only private ones.
    pub fn get_model_id_choices(&self, private: Option<bool>) -> Result<Vec<String>> {
        let mut filters = Filters::new();
        if let Some(private) = private {
            filters.insert("private".into(), Value::Bool(private));
        }
        Ok(self
            .repo
            .list_nodes(Some(GraphConfig::MODEL_LABEL), &filters, None)?
            .into_iter()
            .map(|n| n.id)
            .collect())
    }

    pub fn get_license_choices(&self) -> Result<Vec<String>> {
        Ok(strings(self.repo.list_property_values("license", None, true, false)?))
    }

    pub fn get_merge_method_choices(&self) -> Result<Vec<String>> {
        Ok(strings(self.repo.list_property_values("merge_method", None, true, false)?))
    }

    pub fn get_architecture_choices(&self) -> Result<Vec<String>> {
        Ok(strings(self.repo.list_property_values("architecture", None, true, false)?))
    }

    /// Merged model with the best average score.
    pub fn get_default_model_id(&self) -> Result<Option<String>> {
        let top = self.repo.list_models(&ListModelsQuery {
            label: Some(GraphConfig::MERGED_MODEL_LABEL.to_string()),
            sort_key: Some("average_score".to_string()),
            sort_order: SortOrder::Desc,
            exclude_null_on_sort_key: true,
            limit: Some(1),
            ..Default::default()
        })?;
        Ok(top.into_iter().next().map(|m| m.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, RepositoryOptions};
    use crate::network::RetryConfig;
    use serde_json::{json, Map};

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn service() -> ModelService {
        let store = GraphStore::open_in_memory(RetryConfig::store_conflicts(), None).unwrap();
        let repo = GraphRepository::new(store, RepositoryOptions::default());
        let merged = vec!["Model".to_string(), "MergedModel".to_string()];
        let base = vec!["Model".to_string()];

        repo.create_or_update(
            "base/llama",
            &props(json!({"likes": 50, "license": "llama2", "created_at": "2023-07-01T00:00:00Z"})),
            &base,
        )
        .unwrap();
        repo.create_or_update(
            "team/merge-a",
            &props(json!({
                "likes": 10, "license": "apache-2.0", "merge_method": "slerp",
                "average_score": 71.2, "created_at": "2024-01-01T00:00:00Z"
            })),
            &merged,
        )
        .unwrap();
        repo.create_or_update(
            "team/merge-b",
            &props(json!({
                "likes": 3, "license": "apache-2.0", "merge_method": "ties", "gated": true,
                "created_at": "2024-02-01T00:00:00Z"
            })),
            &merged,
        )
        .unwrap();
        repo.create_or_update(
            "team/private",
            &props(json!({"private": true, "license": "unknown"})),
            &base,
        )
        .unwrap();
        repo.create_relationship(
            "team/merge-a",
            "base/llama",
            GraphConfig::DERIVED_FROM,
            &props(json!({"method": "tags"})),
        )
        .unwrap();
        ModelService::new(Arc::new(repo))
    }

    fn ids(models: Vec<ModelNode>) -> Vec<String> {
        models.into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_sort_by_parse() {
        assert_eq!("most likes".parse::<SortBy>().unwrap(), SortBy::MostLikes);
        assert_eq!("average-score".parse::<SortBy>().unwrap(), SortBy::AverageScore);
        assert_eq!("mmlu".parse::<SortBy>().unwrap(), SortBy::Mmlu);
        assert!("best".parse::<SortBy>().is_err());
        assert_eq!("merged_models".parse::<Exclude>().unwrap(), Exclude::MergedModels);
    }

    #[test]
    fn test_list_models_sorting() {
        let service = service();

        let by_likes = service
            .list_models(&ModelListRequest {
                sort_by: SortBy::MostLikes,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(by_likes), vec!["base/llama", "team/merge-a", "team/merge-b"]);

        let by_score = service
            .list_models(&ModelListRequest {
                sort_by: SortBy::AverageScore,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(by_score), vec!["team/merge-a"]);

        let default = service.list_models(&ModelListRequest::default()).unwrap();
        assert_eq!(default.len(), 4);
        assert_eq!(default[0].id, "team/private");
    }

    #[test]
    fn test_list_models_exclude_and_filters() {
        let service = service();
        let list = |exclude: Exclude| {
            ids(service
                .list_models(&ModelListRequest {
                    exclude: Some(exclude),
                    ..Default::default()
                })
                .unwrap())
        };

        assert_eq!(list(Exclude::BaseModels), vec!["team/merge-a", "team/merge-b"]);
        assert_eq!(list(Exclude::MergedModels), vec!["team/private", "base/llama"]);
        assert_eq!(list(Exclude::Private).len(), 3);
        assert!(!list(Exclude::Gated).contains(&"team/merge-b".to_string()));

        let filtered = service
            .list_models(&ModelListRequest {
                license: Some("apache-2.0".into()),
                merge_method: Some("ties".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(filtered), vec!["team/merge-b"]);

        let derived = service
            .list_models(&ModelListRequest {
                base_model: Some("base/llama".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(derived), vec!["team/merge-a"]);
    }

    #[test]
    fn test_choices_and_default_model() {
        let service = service();
        assert_eq!(
            service.get_license_choices().unwrap(),
            vec!["apache-2.0", "llama2", "unknown"]
        );
        assert_eq!(service.get_merge_method_choices().unwrap(), vec!["slerp", "ties"]);
        assert!(service.get_architecture_choices().unwrap().is_empty());
        assert_eq!(
            service.get_model_id_choices(Some(true)).unwrap(),
            vec!["team/private"]
        );
        assert_eq!(service.get_model_id_choices(None).unwrap().len(), 4);
        assert_eq!(
            service.get_default_model_id().unwrap().as_deref(),
            Some("team/merge-a")
        );
    }

    #[test]
    fn test_lineage() {
        let service = service();
        let graph = service.get_model_lineage("team/merge-a", Some(1)).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.relationships.len(), 1);
        assert!(service.get_model_lineage("missing/model", None).unwrap().is_empty());
    }
}
