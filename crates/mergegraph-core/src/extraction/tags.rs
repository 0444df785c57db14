//! Repository tag extractors.

const BASE_MODEL_PREFIX: &str = "base_model:";
const LICENSE_PREFIX: &str = "license:";

/// Ids from `base_model:<id>` tags.
pub fn base_models_from_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| tag.strip_prefix(BASE_MODEL_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Value of the first `license:<value>` tag.
pub fn license_from_tags(tags: &[String]) -> Option<String> {
    tags.iter()
        .find_map(|tag| tag.strip_prefix(LICENSE_PREFIX))
        .filter(|license| !license.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_base_models_from_tags() {
        let found = base_models_from_tags(&tags(&[
            "merge",
            "base_model:B/y",
            "base_model:finetune:C/w",
            "license:mit",
        ]));
        assert_eq!(found, vec!["B/y", "finetune:C/w"]);
    }

    #[test]
    fn test_license_from_tags() {
        assert_eq!(
            license_from_tags(&tags(&["merge", "license:apache-2.0", "license:mit"])).as_deref(),
            Some("apache-2.0")
        );
        assert!(license_from_tags(&tags(&["merge"])).is_none());
    }
}
