//! Hub API response types and request parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A file entry in a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSibling {
    pub rfilename: String,
}

/// Model metadata as returned by `GET /api/models/{id}` or a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubModelInfo {
    #[serde(alias = "modelId")]
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub card_data: Option<Value>,
    #[serde(default)]
    pub siblings: Vec<RepoSibling>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub likes: Option<i64>,
    #[serde(default)]
    pub downloads: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub disabled: Option<bool>,
    /// `false`, `"auto"` or `"manual"`
    #[serde(default)]
    pub gated: Option<Value>,
}

impl HubModelInfo {
    pub fn is_gated(&self) -> bool {
        matches!(self.gated.as_ref().and_then(Value::as_str), Some("auto") | Some("manual"))
    }

    pub fn has_file(&self, filename: &str) -> bool {
        self.siblings.iter().any(|s| s.rfilename == filename)
    }

    /// First entry of the declared `architectures` list.
    pub fn architecture(&self) -> Option<String> {
        self.config
            .as_ref()?
            .get("architectures")?
            .as_array()?
            .first()?
            .as_str()
            .map(str::to_string)
    }
}

/// Sort direction for listings; the hub only understands descending (`-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Descending,
}

/// Parameters for `GET /api/models`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListModelsParams {
    pub author: Option<String>,
    pub model_name: Option<String>,
    pub tags: Vec<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<SortDirection>,
    pub limit: Option<usize>,
    pub full: bool,
    pub card_data: bool,
    pub config: bool,
}

impl ListModelsParams {
    /// Newest models carrying `tag`.
    pub fn by_tag(tag: impl Into<String>) -> Self {
        Self {
            tags: vec![tag.into()],
            sort: Some("createdAt".into()),
            direction: Some(SortDirection::Descending),
            ..Default::default()
        }
    }

    /// Exact repository lookup through the listing endpoint.
    pub fn by_repo(author: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            model_name: Some(model_name.into()),
            full: true,
            card_data: true,
            config: true,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Query string pairs in a stable order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(author) = &self.author {
            pairs.push(("author", author.clone()));
        }
        if let Some(name) = &self.model_name {
            pairs.push(("model_name", name.clone()));
        }
        for tag in &self.tags {
            pairs.push(("filter", tag.clone()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort", sort.clone()));
        }
        if self.direction.is_some() {
            pairs.push(("direction", "-1".into()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if self.full {
            pairs.push(("full", "true".into()));
        }
        if self.card_data {
            pairs.push(("cardData", "true".into()));
        }
        if self.config {
            pairs.push(("config", "true".into()));
        }
        pairs
    }
}

/// Account returned by `GET /api/whoami-v2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubUser {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_info_deserialize() {
        let info: HubModelInfo = serde_json::from_value(json!({
            "modelId": "teamX/modelY",
            "author": "teamX",
            "tags": ["merge", "base_model:B/y", "license:mit"],
            "siblings": [{"rfilename": "README.md"}, {"rfilename": "mergekit_config.yml"}],
            "config": {"architectures": ["MistralForCausalLM"]},
            "likes": 3,
            "createdAt": "2024-02-01T10:00:00.000Z",
            "gated": "manual"
        }))
        .unwrap();

        assert_eq!(info.id, "teamX/modelY");
        assert!(info.is_gated());
        assert!(info.has_file("mergekit_config.yml"));
        assert_eq!(info.architecture().as_deref(), Some("MistralForCausalLM"));
        assert!(info.created_at.is_some());
    }

    #[test]
    fn test_gated_false() {
        let info: HubModelInfo =
            serde_json::from_value(json!({"id": "a/b", "gated": false})).unwrap();
        assert!(!info.is_gated());
    }

    #[test]
    fn test_query_pairs() {
        let params = ListModelsParams::by_tag("merge").with_limit(Some(10));
        assert_eq!(
            params.query_pairs(),
            vec![
                ("filter", "merge".to_string()),
                ("sort", "createdAt".to_string()),
                ("direction", "-1".to_string()),
                ("limit", "10".to_string()),
            ]
        );
    }
}
