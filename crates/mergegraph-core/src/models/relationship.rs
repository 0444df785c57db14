//! Derivation edges discovered by extraction.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Technique that produced a derivation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    #[serde(rename = "tags")]
    Tags,
    #[serde(rename = "cardData.base_model")]
    CardData,
    #[serde(rename = "mergekit_config")]
    MergekitConfig,
    #[serde(rename = "modelCard.yaml")]
    ReadmeYaml,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Tags => "tags",
            ExtractionMethod::CardData => "cardData.base_model",
            ExtractionMethod::MergekitConfig => "mergekit_config",
            ExtractionMethod::ReadmeYaml => "modelCard.yaml",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `source` was derived from `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedFrom {
    pub source: String,
    pub target: String,
    pub method: ExtractionMethod,
    /// URL of the document the edge was read from.
    pub origin: String,
}

impl DerivedFrom {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        method: ExtractionMethod,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            method,
            origin: origin.into(),
        }
    }

    pub fn properties(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("method".into(), json!(self.method.as_str()));
        map.insert("origin".into(), json!(self.origin));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_properties() {
        let edge = DerivedFrom::new(
            "A/x",
            "B/y",
            ExtractionMethod::CardData,
            "https://huggingface.co/api/models/A/x",
        );
        let props = edge.properties();
        assert_eq!(props["method"], "cardData.base_model");
        assert_eq!(props["origin"], "https://huggingface.co/api/models/A/x");
    }
}
