//! Model hub access.
//!
//! The indexing pipeline reads everything it knows about a model through the
//! [`ModelHub`] trait:
//! - Model listing (by tag, author, name, sort, pagination)
//! - Single model lookup by id
//! - Raw file download within a repository
//!
//! # Module Organization
//!
//! - [`types`] - API response structs and listing parameters
//! - [`client`] - HuggingFace implementation over reqwest
//! - [`resolve`] - Lookup with gated/renamed repository fallbacks

mod client;
mod resolve;
mod types;

pub use client::HuggingFaceHub;
pub use resolve::{download_first, resolve_model_info, DownloadedFile, ResolvedModel};
pub use types::{HubModelInfo, HubUser, ListModelsParams, RepoSibling, SortDirection};

use crate::error::Result;
use async_trait::async_trait;

/// Read-only model hub.
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// List models matching `params`, following pagination up to `params.limit`.
    async fn list_models(&self, params: &ListModelsParams) -> Result<Vec<HubModelInfo>>;

    /// Look up one model.
    ///
    /// Fails with `HubNotFound` or `HubGated` for inaccessible repositories.
    async fn model_info(&self, model_id: &str) -> Result<HubModelInfo>;

    /// Download a file from the main revision as text.
    async fn download_file(&self, model_id: &str, filename: &str) -> Result<String>;

    /// Name of the authenticated account, if any.
    async fn whoami(&self) -> Result<Option<String>>;

    /// Base URL used for data-origin links.
    fn base_url(&self) -> &str;
}

/// URL of the model info document.
pub fn model_info_url(base: &str, model_id: &str) -> String {
    format!("{}/api/models/{}", base, model_id)
}

/// URL of a file on the main revision.
pub fn file_url(base: &str, model_id: &str, filename: &str) -> String {
    format!(
        "{}/{}/resolve/main/{}",
        base,
        model_id,
        urlencoding::encode(filename)
    )
}

/// Landing page of a model.
pub fn model_url(base: &str, model_id: &str) -> String {
    format!("{}/{}", base, model_id)
}

/// URL of a listing request.
pub fn list_url(base: &str, params: &ListModelsParams) -> String {
    let query = params
        .query_pairs()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        format!("{}/api/models", base)
    } else {
        format!("{}/api/models?{}", base, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://huggingface.co";

    #[test]
    fn test_origin_urls() {
        assert_eq!(
            model_info_url(BASE, "teamX/modelY"),
            "https://huggingface.co/api/models/teamX/modelY"
        );
        assert_eq!(
            file_url(BASE, "teamX/modelY", "README.md"),
            "https://huggingface.co/teamX/modelY/resolve/main/README.md"
        );
        assert_eq!(model_url(BASE, "teamX/modelY"), "https://huggingface.co/teamX/modelY");
    }

    #[test]
    fn test_list_url() {
        let params = ListModelsParams::by_repo("teamX", "model Y");
        assert_eq!(
            list_url(BASE, &params),
            "https://huggingface.co/api/models?author=teamX&model_name=model%20Y&full=true&cardData=true&config=true"
        );
    }
}
