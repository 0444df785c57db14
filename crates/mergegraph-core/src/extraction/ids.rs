//! Repository id helpers.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static REPO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[-.\w]*/\w[-.\w]*$").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

/// Whether `repo_id` has the `namespace/name` shape.
///
/// Both segments start with a word character and `..` never appears, so
/// relative paths like `./local` or `../up` are rejected.
pub fn is_valid_repo_id(repo_id: &str) -> bool {
    REPO_ID.is_match(repo_id) && !repo_id.contains("..")
}

/// All http(s) URLs in `text`, in order of appearance.
pub fn extract_urls_from_text(text: &str) -> Vec<String> {
    URL.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// `namespace/name` of a hub repository URL such as `https://huggingface.co/D/z`.
pub fn repo_id_from_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(['.', ',', ')', ']', '"', '\'']);
    let parsed = url::Url::parse(trimmed).ok()?;
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty()).peekable();
    if segments.peek() == Some(&"models") {
        segments.next();
    }
    let namespace = segments.next()?;
    let name = segments.next()?;
    let repo_id = format!("{}/{}", namespace, name);
    is_valid_repo_id(&repo_id).then_some(repo_id)
}

/// Part after the namespace.
pub fn model_name_from_id(model_id: &str) -> Option<String> {
    model_id
        .split_once('/')
        .map(|(_, name)| name.to_string())
        .filter(|name| !name.is_empty())
}

/// Namespace part.
pub fn author_from_id(model_id: &str) -> Option<String> {
    model_id
        .split_once('/')
        .map(|(author, _)| author.to_string())
        .filter(|author| !author.is_empty())
}

/// Keep well-formed candidates that differ from `model_id`.
pub fn filter_base_models<I, S>(candidates: I, model_id: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .map(|c| c.as_ref().trim().to_string())
        .filter(|c| is_valid_repo_id(c) && c != model_id)
        .collect()
}
