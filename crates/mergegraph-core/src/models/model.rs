//! The model node record.

use crate::config::GraphConfig;
use crate::error::{MergeGraphError, Result};
use crate::models::graph::GraphNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Merge algorithm used to produce a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MergeMethod {
    Linear,
    Slerp,
    TaskArithmetic,
    Ties,
    DareTies,
    DareLinear,
    Passthrough,
    Breadcrumbs,
    BreadcrumbsTies,
    ModelStock,
    Other,
}

impl MergeMethod {
    pub const ALL: &'static [MergeMethod] = &[
        MergeMethod::Linear,
        MergeMethod::Slerp,
        MergeMethod::TaskArithmetic,
        MergeMethod::Ties,
        MergeMethod::DareTies,
        MergeMethod::DareLinear,
        MergeMethod::Passthrough,
        MergeMethod::Breadcrumbs,
        MergeMethod::BreadcrumbsTies,
        MergeMethod::ModelStock,
        MergeMethod::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Linear => "linear",
            MergeMethod::Slerp => "slerp",
            MergeMethod::TaskArithmetic => "task_arithmetic",
            MergeMethod::Ties => "ties",
            MergeMethod::DareTies => "dare_ties",
            MergeMethod::DareLinear => "dare_linear",
            MergeMethod::Passthrough => "passthrough",
            MergeMethod::Breadcrumbs => "breadcrumbs",
            MergeMethod::BreadcrumbsTies => "breadcrumbs_ties",
            MergeMethod::ModelStock => "model_stock",
            MergeMethod::Other => "other",
        }
    }

    /// Parse a method name; unrecognized names map to [`MergeMethod::Other`].
    pub fn parse(value: &str) -> MergeMethod {
        let normalized = value.trim().to_lowercase();
        MergeMethod::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == normalized)
            .unwrap_or(MergeMethod::Other)
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MergeMethod {
    fn from(value: String) -> Self {
        MergeMethod::parse(&value)
    }
}

impl From<MergeMethod> for String {
    fn from(value: MergeMethod) -> Self {
        value.as_str().to_string()
    }
}

/// One hub repository in the provenance graph.
///
/// Every attribute except `id` is optional; absent values are omitted from
/// the stored property bag rather than written as nulls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_method: Option<MergeMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arc_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hella_swag_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mmlu_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truthfulqa_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winogrande_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gsm8k_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<String>,
    /// Graph labels; stored alongside, not inside, the property bag.
    #[serde(skip)]
    pub labels: Vec<String>,
}

impl ModelNode {
    /// Fields shown in tabular listings, in column order.
    pub const DISPLAY_FIELDS: &'static [&'static str] = &[
        "id",
        "license",
        "merge_method",
        "architecture",
        "likes",
        "downloads",
        "average_score",
        "arc_score",
        "hella_swag_score",
        "mmlu_score",
        "truthfulqa_score",
        "winogrande_score",
        "gsm8k_score",
        "created_at",
        "updated_at",
        "evaluated_at",
    ];
    pub const INT_FIELDS: &'static [&'static str] = &["likes", "downloads"];
    pub const FLOAT_FIELDS: &'static [&'static str] = &[
        "average_score",
        "arc_score",
        "hella_swag_score",
        "mmlu_score",
        "truthfulqa_score",
        "winogrande_score",
        "gsm8k_score",
    ];
    pub const DATETIME_FIELDS: &'static [&'static str] =
        &["created_at", "updated_at", "evaluated_at", "indexed_at"];
    /// Never shown to users.
    pub const HIDDEN_FIELDS: &'static [&'static str] =
        &["alt_ids", "indexed", "indexed_at", "new_id", "disabled"];
    /// Fields covered by the text index.
    pub const TEXT_FIELDS: &'static [&'static str] =
        &["id", "name", "author", "description", "license", "merge_method", "architecture"];

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Human readable column title for a field.
    pub fn field_label(field: &str) -> &str {
        match field {
            "id" => "Model",
            "alt_ids" => "Previous ids",
            "url" => "URL",
            "merge_method" => "Merge method",
            "created_at" => "Created",
            "updated_at" => "Updated",
            "evaluated_at" => "Evaluated",
            "average_score" => "Average",
            "arc_score" => "ARC",
            "hella_swag_score" => "HellaSwag",
            "mmlu_score" => "MMLU",
            "truthfulqa_score" => "TruthfulQA",
            "winogrande_score" => "Winogrande",
            "gsm8k_score" => "GSM8k",
            "license" => "License",
            "architecture" => "Architecture",
            "likes" => "Likes",
            "downloads" => "Downloads",
            "name" => "Name",
            "author" => "Author",
            "description" => "Description",
            "private" => "Private",
            "gated" => "Gated",
            "disabled" => "Disabled",
            other => other,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.labels.iter().any(|l| l == GraphConfig::MERGED_MODEL_LABEL)
    }

    /// Property bag without `id`, with absent values omitted.
    pub fn to_properties(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.remove("id");
                Ok(map)
            }
            other => Err(MergeGraphError::Other(format!(
                "model node serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Rebuild a typed record from a stored node.
    pub fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let mut map = node.properties.clone();
        map.retain(|_, v| !v.is_null());
        map.insert("id".to_string(), Value::String(node.id.clone()));
        let mut model: ModelNode = serde_json::from_value(Value::Object(map))?;
        model.labels = node.labels.clone();
        Ok(model)
    }
}
