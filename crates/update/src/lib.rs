//! Self-update flow (§4.12): poll the release feed, download and apply a
//! newer matching release, and reconcile the marker file left from a
//! previous apply on the next startup.

mod apply;
pub mod error;
pub mod release_feed;

use std::path::Path;

use firefrp_config::UpdateChannel;
use tracing::info;

pub use apply::{consume_startup_marker, MarkerOutcome};
pub use error::{Result, UpdateError};
pub use release_feed::GithubRelease;

/// Coordinates the release-feed client and the apply step behind the
/// single entry point `AppRoot`/`BotDispatcher`'s `update` command use.
pub struct UpdateService {
    client: reqwest::Client,
    repository_url: String,
}

impl UpdateService {
    pub fn new(repository_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self { client, repository_url: repository_url.into() })
    }

    /// Polls the feed and returns the newest release matching `channel`, if
    /// it is actually newer than `current_version`.
    pub async fn check(&self, channel: UpdateChannel, current_version: &str) -> Result<Option<GithubRelease>> {
        let api_url = release_feed::github_releases_api_url(&self.repository_url)?;
        let releases = release_feed::fetch_releases(&self.client, &api_url).await?;
        let Some(picked) = release_feed::pick_release(&releases, channel, current_version) else {
            return Ok(None);
        };
        if !release_feed::is_newer_version(&picked.tag_name, current_version) {
            return Ok(None);
        }
        Ok(Some(picked.clone()))
    }

    /// Downloads and installs `release` into `install_root`, writing the
    /// startup marker into `data_dir`. Callers are expected to exit the
    /// process with status 0 immediately after this returns `Ok`, letting
    /// an external supervisor restart into the new binary (§4.12, §4.14).
    pub async fn apply(&self, release: &GithubRelease, install_root: &Path, data_dir: &Path) -> Result<()> {
        info!(version = %release.tag_name, "applying update");
        apply::download_and_apply(&self.client, release, install_root, data_dir).await
    }
}

/// Locates the directory the running executable lives in, used as the
/// update apply step's `install_root` (§4.12's "replace a fixed set of
/// paths" target).
pub fn current_install_root() -> Result<std::path::PathBuf> {
    let exe = std::env::current_exe().map_err(|source| UpdateError::Io {
        path: std::path::PathBuf::from("<current_exe>"),
        source,
    })?;
    exe.parent().map(Path::to_path_buf).ok_or(UpdateError::UnknownInstallRoot)
}
