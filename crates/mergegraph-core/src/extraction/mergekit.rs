//! Merge configuration extractors.
//!
//! Configurations come either from a dedicated file in the repository or from
//! fenced YAML blocks in the README. A file may hold several YAML documents;
//! each is inspected independently.

use crate::models::MergeMethod;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Convert YAML to JSON, dropping mapping entries whose key is not a scalar.
///
/// Numeric and boolean keys become strings. Non-finite floats become `null`.
pub fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(entries) => {
            let mut object = serde_json::Map::new();
            for (key, value) in entries {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        debug!("Skipping YAML entry with non-scalar key {:?}", other);
                        continue;
                    }
                };
                object.insert(key, yaml_to_json(value));
            }
            Value::Object(object)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

/// Parse every YAML document in `text` into a JSON object.
///
/// Documents that fail to parse or are not mappings are skipped.
pub fn parse_yaml_documents(text: &str) -> Vec<Value> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        match serde_yaml::Value::deserialize(document) {
            Ok(parsed) => {
                if let value @ Value::Object(_) = yaml_to_json(parsed) {
                    documents.push(value);
                }
            }
            Err(e) => debug!("Skipping invalid YAML document: {}", e),
        }
    }
    documents
}

fn push_string_or_list(value: Option<&Value>, found: &mut Vec<String>) {
    match value {
        Some(Value::String(s)) => found.push(s.clone()),
        Some(Value::Array(items)) => {
            found.extend(items.iter().filter_map(Value::as_str).map(str::to_string))
        }
        _ => {}
    }
}

fn list<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Base model references of one configuration document.
///
/// Collects `base_model`, `models[].model`, `slices[].sources[].model` and
/// `experts[].source_model`.
pub fn base_models_from_mergekit_config(config: &Value) -> Vec<String> {
    let mut found = Vec::new();
    push_string_or_list(config.get("base_model"), &mut found);

    let sources = list(config, "slices").flat_map(|slice| list(slice, "sources"));
    for entry in list(config, "models").chain(sources) {
        if let Some(model) = entry.get("model").and_then(Value::as_str) {
            found.push(model.to_string());
        }
    }

    for expert in list(config, "experts") {
        if let Some(model) = expert.get("source_model").and_then(Value::as_str) {
            found.push(model.to_string());
        }
    }

    found
}

pub fn base_models_from_mergekit_configs(configs: &[Value]) -> Vec<String> {
    configs
        .iter()
        .flat_map(base_models_from_mergekit_config)
        .collect()
}

/// `merge_method` of one configuration document.
pub fn merge_method_from_mergekit_config(config: &Value) -> Option<MergeMethod> {
    config
        .get("merge_method")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(MergeMethod::parse)
}

/// First `merge_method` found across documents.
pub fn merge_method_from_mergekit_configs(configs: &[Value]) -> Option<MergeMethod> {
    configs.iter().find_map(merge_method_from_mergekit_config)
}

/// Fenced ```` ```yaml ```` / ```` ```yml ```` blocks mentioning `merge_method`,
/// joined as a multi-document YAML string.
pub fn mergekit_configs_string_from_readme(readme: &str) -> Option<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in readme.lines() {
        if line.starts_with("```yaml") || line.starts_with("```yml") {
            current = Some(String::new());
            continue;
        }
        if line.starts_with("```") {
            if let Some(block) = current.take() {
                if block.contains("merge_method") {
                    blocks.push(block);
                }
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    (!blocks.is_empty()).then(|| blocks.join("---\n"))
}

/// Configuration documents embedded in a README.
pub fn mergekit_configs_from_readme(readme: &str) -> Vec<Value> {
    mergekit_configs_string_from_readme(readme)
        .map(|s| parse_yaml_documents(&s))
        .unwrap_or_default()
}
