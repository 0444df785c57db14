//! Free-text README extractors.

use crate::models::MergeMethod;
use regex::Regex;
use std::sync::LazyLock;

/// Phrases that usually open a sentence describing the model, in priority order.
const DESCRIPTION_HINTS: &[&str] = &[
    " is a fine-tuned ",
    "is a merge of",
    " based on ",
    "was merged using",
    "created using",
    "made with",
    "was trained ",
    " is a ",
    "this model is ",
    "this is an ",
    "mergekit",
    "lazymergekit",
    "this is the ",
    "it is the ",
    "merge ",
    " using ",
    "large language model ",
    "language model",
];

/// Lines starting with these are list items, comments or headings.
const SKIP_PREFIXES: &[&str] = &["-", "<!--", "#"];

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w.-]+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Replace markup and punctuation with spaces and collapse whitespace.
pub fn sanitize_description(description: &str) -> String {
    let cleaned = NON_WORD.replace_all(description, " ");
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

/// First README line that contains one of the description hints.
pub fn description_from_readme(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            !SKIP_PREFIXES.iter().any(|p| lower.starts_with(p))
                && DESCRIPTION_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .map(sanitize_description)
        .find(|description| !description.is_empty())
}

/// Approximate the merge method by substring search over known names.
///
/// Longer names are tried first so `dare_ties` is not reported as `ties`.
pub fn extract_merge_method_from_description(description: &str) -> Option<MergeMethod> {
    let mut methods: Vec<MergeMethod> = MergeMethod::ALL
        .iter()
        .copied()
        .filter(|m| *m != MergeMethod::Other)
        .collect();
    methods.sort_by_key(|m| std::cmp::Reverse(m.as_str().len()));

    methods
        .into_iter()
        .find(|method| description.contains(method.as_str()))
}
