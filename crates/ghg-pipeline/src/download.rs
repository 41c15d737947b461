use ghg_storage::{ArtifactStore, HttpFetcher};
use serde::Serialize;
use tracing::{info, warn};

use crate::registry::SourceRegistry;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadOutcome {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Fetches every enabled entry that has a url into `store`. Files already on
/// disk are kept unless `force` is set. A failed source is logged and the
/// remaining sources are still attempted.
pub async fn download_all(
    fetcher: &HttpFetcher,
    store: &ArtifactStore,
    registry: &SourceRegistry,
    force: bool,
) -> DownloadOutcome {
    let mut outcome = DownloadOutcome::default();
    for entry in registry.enabled() {
        let Some(url) = entry.url.as_deref() else {
            continue;
        };
        let target = store.path_for(&entry.filename);
        if target.is_file() && !force {
            info!(source = %entry.id, path = %target.display(), "already downloaded; skipping");
            outcome.skipped.push(entry.id.clone());
            continue;
        }
        match fetcher.download_to(store, &entry.filename, url).await {
            Ok(_) => outcome.downloaded.push(entry.id.clone()),
            Err(err) => {
                warn!(source = %entry.id, url, error = %format!("{err:#}"), "download failed; continuing");
                outcome.failed.push(entry.id.clone());
            }
        }
    }
    info!(
        downloaded = outcome.downloaded.len(),
        skipped = outcome.skipped.len(),
        failed = outcome.failed.len(),
        "downloads finished"
    );
    outcome
}
