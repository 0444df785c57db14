//! Model lookup with fallbacks for gated and renamed repositories.

use super::types::{HubModelInfo, ListModelsParams};
use super::{file_url, list_url, model_info_url, ModelHub};
use crate::error::{MergeGraphError, Result};
use crate::extraction::{extract_urls_from_text, is_valid_repo_id, repo_id_from_url};
use tracing::debug;

/// Hub metadata plus the URL it was read from.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub info: HubModelInfo,
    pub origin: String,
}

/// Text content of a repository file plus its URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub filename: String,
    pub content: String,
    pub origin: String,
}

/// Resolve a model's current metadata.
///
/// Returns `Ok(None)` when the model is not found, is gated without a
/// listing fallback, or the id is malformed. With `include_gated`, a gated
/// model is looked up through the listing endpoint instead; with
/// `include_moved`, a "moved to <url>" hint in the gated error redirects the
/// lookup to the new repository.
pub async fn resolve_model_info(
    hub: &dyn ModelHub,
    model_id: &str,
    include_gated: bool,
    include_moved: bool,
) -> Result<Option<ResolvedModel>> {
    if !is_valid_repo_id(model_id) {
        debug!("Model {} is invalid", model_id);
        return Ok(None);
    }

    let message = match hub.model_info(model_id).await {
        Ok(info) => {
            debug!("Model info for {} retrieved", model_id);
            return Ok(Some(ResolvedModel {
                info,
                origin: model_info_url(hub.base_url(), model_id),
            }));
        }
        Err(MergeGraphError::HubGated { message, .. }) => message,
        Err(MergeGraphError::HubNotFound { .. }) | Err(MergeGraphError::InvalidRepoId(_)) => {
            debug!("Model {} not found", model_id);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if !include_gated {
        debug!("Model {} is in a gated repository", model_id);
        return Ok(None);
    }

    let mut target_id = model_id.to_string();
    if include_moved {
        if let Some(moved) = extract_urls_from_text(&message)
            .first()
            .and_then(|url| repo_id_from_url(url))
        {
            debug!("Model {} was moved to {}", model_id, moved);
            target_id = moved;
        }
    }

    let Some((author, name)) = target_id.split_once('/') else {
        return Ok(None);
    };
    let params = ListModelsParams::by_repo(author, name);
    let candidates = match hub.list_models(&params).await {
        Ok(models) => models,
        Err(e) if e.is_unresolvable_model() => Vec::new(),
        Err(e) => return Err(e),
    };

    let found = candidates.into_iter().find(|m| m.id == target_id);
    if found.is_none() {
        debug!("Model {} not found in listing", target_id);
    }
    Ok(found.map(|info| ResolvedModel {
        info,
        origin: list_url(hub.base_url(), &params),
    }))
}

/// Download the first available file among `filenames`.
///
/// When `siblings` is non-empty, names absent from it are skipped without a
/// request. Missing or access-restricted files are treated as absent.
pub async fn download_first(
    hub: &dyn ModelHub,
    model_id: &str,
    filenames: &[&str],
    siblings: &[super::RepoSibling],
) -> Result<Option<DownloadedFile>> {
    for filename in filenames {
        if !siblings.is_empty() && !siblings.iter().any(|s| s.rfilename == *filename) {
            continue;
        }
        match hub.download_file(model_id, filename).await {
            Ok(content) => {
                debug!("'{}' file for {} retrieved", filename, model_id);
                return Ok(Some(DownloadedFile {
                    filename: filename.to_string(),
                    content,
                    origin: file_url(hub.base_url(), model_id, filename),
                }));
            }
            Err(e) if e.is_unresolvable_model() => continue,
            Err(e) => return Err(e),
        }
    }
    debug!("None of {:?} found for {}", filenames, model_id);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{HubModelInfo, RepoSibling};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StaticHub {
        infos: HashMap<String, HubModelInfo>,
        gated: HashMap<String, String>,
        listing: Vec<HubModelInfo>,
        files: HashMap<(String, String), String>,
        downloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelHub for StaticHub {
        async fn list_models(&self, params: &ListModelsParams) -> Result<Vec<HubModelInfo>> {
            let author = params.author.clone().unwrap_or_default();
            Ok(self
                .listing
                .iter()
                .filter(|m| m.id.starts_with(&format!("{}/", author)))
                .cloned()
                .collect())
        }

        async fn model_info(&self, model_id: &str) -> Result<HubModelInfo> {
            if let Some(message) = self.gated.get(model_id) {
                return Err(MergeGraphError::HubGated {
                    model_id: model_id.into(),
                    message: message.clone(),
                });
            }
            self.infos
                .get(model_id)
                .cloned()
                .ok_or_else(|| MergeGraphError::HubNotFound {
                    model_id: model_id.into(),
                })
        }

        async fn download_file(&self, model_id: &str, filename: &str) -> Result<String> {
            self.downloads.lock().unwrap().push(filename.to_string());
            self.files
                .get(&(model_id.to_string(), filename.to_string()))
                .cloned()
                .ok_or_else(|| MergeGraphError::HubNotFound {
                    model_id: model_id.into(),
                })
        }

        async fn whoami(&self) -> Result<Option<String>> {
            Ok(None)
        }

        fn base_url(&self) -> &str {
            "https://huggingface.co"
        }
    }

    #[tokio::test]
    async fn test_resolve_found_and_missing() {
        let mut hub = StaticHub::default();
        hub.infos.insert("A/x".into(), HubModelInfo { id: "A/x".into(), ..Default::default() });

        let resolved = resolve_model_info(&hub, "A/x", true, true).await.unwrap().unwrap();
        assert_eq!(resolved.origin, "https://huggingface.co/api/models/A/x");
        assert!(resolve_model_info(&hub, "B/y", true, true).await.unwrap().is_none());
        assert!(resolve_model_info(&hub, "./local/path", true, true)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resolve_gated_moved_through_listing() {
        let mut hub = StaticHub::default();
        hub.gated.insert(
            "C/z".into(),
            "Access to model C/z is restricted. Repository moved to https://huggingface.co/D/z".into(),
        );
        hub.listing.push(HubModelInfo { id: "D/z".into(), ..Default::default() });

        let resolved = resolve_model_info(&hub, "C/z", true, true).await.unwrap().unwrap();
        assert_eq!(resolved.info.id, "D/z");
        assert!(resolved.origin.contains("author=D"));

        assert!(resolve_model_info(&hub, "C/z", false, true).await.unwrap().is_none());
        assert!(resolve_model_info(&hub, "C/z", true, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_download_first_respects_siblings() {
        let mut hub = StaticHub::default();
        hub.files.insert(
            ("A/x".into(), "merge.yml".into()),
            "merge_method: ties\n".into(),
        );
        let siblings = vec![RepoSibling { rfilename: "merge.yml".into() }];

        let file = download_first(
            &hub,
            "A/x",
            &["mergekit_config.yml", "merge.yml"],
            &siblings,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(file.filename, "merge.yml");
        assert_eq!(file.origin, "https://huggingface.co/A/x/resolve/main/merge.yml");
        assert_eq!(*hub.downloads.lock().unwrap(), vec!["merge.yml".to_string()]);
    }
}
