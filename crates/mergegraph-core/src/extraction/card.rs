//! Model card metadata (README front matter) extractors.

use serde_json::Value;

const FRONT_MATTER_DELIMITER: &str = "---\n";

/// Raw front matter of a README starting with `---`.
pub fn card_data_string_from_readme(readme: &str) -> Option<&str> {
    if !readme.starts_with(FRONT_MATTER_DELIMITER) {
        return None;
    }
    readme.split(FRONT_MATTER_DELIMITER).nth(1)
}

/// README text after the front matter block.
pub fn readme_body(readme: &str) -> &str {
    let Some(rest) = readme.strip_prefix(FRONT_MATTER_DELIMITER) else {
        return readme;
    };
    if let Some(stripped) = rest.strip_prefix(FRONT_MATTER_DELIMITER) {
        return stripped;
    }
    match rest.find("\n---\n") {
        Some(end) => &rest[end + 5..],
        None => readme,
    }
}

/// Front matter parsed as a JSON object.
pub fn card_data_from_readme(readme: &str) -> Option<Value> {
    let raw = card_data_string_from_readme(readme)?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(raw).ok()?;
    match super::mergekit::yaml_to_json(parsed) {
        value @ Value::Object(_) => Some(value),
        _ => None,
    }
}

/// `base_model` as a string or list.
pub fn base_models_from_card_data(card_data: &Value) -> Vec<String> {
    match card_data.get("base_model") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn license_from_card_data(card_data: &Value) -> Option<String> {
    non_empty_str(card_data, "license")
}

pub fn model_name_from_card_data(card_data: &Value) -> Option<String> {
    non_empty_str(card_data, "model_name")
}

fn non_empty_str(card_data: &Value, key: &str) -> Option<String> {
    card_data
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const README: &str = "---\nlicense: apache-2.0\nbase_model:\n- B/y\n- C/w\ntags:\n- merge\n---\n# Model\n\nThis model is a merge of B/y and C/w.\n";

    #[test]
    fn test_card_data_from_readme() {
        let card = card_data_from_readme(README).unwrap();
        assert_eq!(base_models_from_card_data(&card), vec!["B/y", "C/w"]);
        assert_eq!(license_from_card_data(&card).as_deref(), Some("apache-2.0"));
        assert!(model_name_from_card_data(&card).is_none());
    }

    #[test]
    fn test_single_base_model_string() {
        let card = card_data_from_readme("---\nbase_model: B/y\nmodel_name: Fancy\n---\nbody").unwrap();
        assert_eq!(base_models_from_card_data(&card), vec!["B/y"]);
        assert_eq!(model_name_from_card_data(&card).as_deref(), Some("Fancy"));
    }

    #[test]
    fn test_readme_without_front_matter() {
        assert!(card_data_string_from_readme("# Title\n").is_none());
        assert!(card_data_from_readme("# Title\n").is_none());
        assert_eq!(readme_body("# Title\n"), "# Title\n");
    }

    #[test]
    fn test_readme_body() {
        assert_eq!(
            readme_body(README),
            "# Model\n\nThis model is a merge of B/y and C/w.\n"
        );
        assert_eq!(readme_body("---\n---\nbody"), "body");
    }
}
