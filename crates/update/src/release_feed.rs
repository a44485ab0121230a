//! Polls the upstream GitHub release feed and picks the newest release
//! matching the effective update channel (§4.12). Grounded on
//! `crates/gateway/src/update_check.rs`'s GitHub Releases polling and
//! semver-prefix comparison, extended here from "latest release only" to
//! "list releases, filter by channel, then pick newest" since FireFrp has
//! to choose between a `dev` (pre-release) and `stable` track.

use firefrp_config::UpdateChannel;
use serde::Deserialize;

use crate::error::{Result, UpdateError};

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

pub fn github_releases_api_url(repository_url: &str) -> Result<String> {
    let slug = github_repo_slug(repository_url)
        .ok_or_else(|| UpdateError::UnsupportedRepository(repository_url.to_owned()))?;
    Ok(format!("https://api.github.com/repos/{slug}/releases"))
}

pub async fn fetch_releases(client: &reqwest::Client, releases_api_url: &str) -> Result<Vec<GithubRelease>> {
    let releases = client
        .get(releases_api_url)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .header(reqwest::header::USER_AGENT, "firefrp-update")
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<GithubRelease>>()
        .await?;
    Ok(releases)
}

/// Pick the newest release matching `channel`, relative to `current_version`
/// for the `auto` case (§4.12: "auto → by current version prefix" — a
/// pre-release current version stays on the pre-release track, otherwise
/// the stable track).
pub fn pick_release<'a>(
    releases: &'a [GithubRelease],
    channel: UpdateChannel,
    current_version: &str,
) -> Option<&'a GithubRelease> {
    let want_prerelease = match channel {
        UpdateChannel::Dev => true,
        UpdateChannel::Stable => false,
        UpdateChannel::Auto => is_prerelease_version(current_version),
    };

    releases
        .iter()
        .filter(|r| r.prerelease == want_prerelease)
        .filter_map(|r| parse_semver_triplet(&r.tag_name).map(|v| (v, r)))
        .max_by_key(|(v, _)| *v)
        .map(|(_, r)| r)
}

pub fn is_newer_version(latest: &str, current: &str) -> bool {
    matches!(
        (parse_semver_triplet(latest), parse_semver_triplet(current)),
        (Some(l), Some(c)) if l > c
    )
}

fn is_prerelease_version(version: &str) -> bool {
    normalize_version(version).contains('-')
}

fn github_repo_slug(repository_url: &str) -> Option<String> {
    let trimmed = repository_url.trim();
    let without_scheme = trimmed.strip_prefix("https://").or_else(|| trimmed.strip_prefix("http://"))?;

    let mut parts = without_scheme.split('/');
    let host = parts.next()?.trim();
    if !host.eq_ignore_ascii_case("github.com") {
        return None;
    }

    let owner = parts.next()?.trim();
    let repo_part = parts.next()?.trim();
    let repo = repo_part.strip_suffix(".git").unwrap_or(repo_part);

    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

fn normalize_version(value: &str) -> String {
    value.trim().trim_start_matches(['v', 'V']).to_owned()
}

fn parse_semver_triplet(version: &str) -> Option<(u64, u64, u64)> {
    let normalized = normalize_version(version);
    let core = normalized.split_once(['-', '+']).map(|(v, _)| v).unwrap_or(&normalized);
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool) -> GithubRelease {
        GithubRelease {
            tag_name: tag.to_string(),
            prerelease,
            assets: Vec::new(),
        }
    }

    #[test]
    fn parses_github_repo_slug() {
        assert_eq!(
            github_repo_slug("https://github.com/lieyanc/firefrp"),
            Some("lieyanc/firefrp".to_owned())
        );
        assert_eq!(github_repo_slug("https://example.com/lieyanc/firefrp"), None);
    }

    #[test]
    fn compares_semver_versions() {
        assert!(is_newer_version("0.3.0", "0.2.9"));
        assert!(is_newer_version("v1.0.0", "0.9.9"));
        assert!(!is_newer_version("0.2.5", "0.2.5"));
        assert!(!is_newer_version("latest", "0.2.5"));
    }

    #[test]
    fn stable_channel_picks_newest_non_prerelease() {
        let releases = vec![release("0.3.0-beta.1", true), release("0.2.0", false), release("0.1.0", false)];
        let picked = pick_release(&releases, UpdateChannel::Stable, "0.1.0").unwrap();
        assert_eq!(picked.tag_name, "0.2.0");
    }

    #[test]
    fn dev_channel_picks_newest_prerelease() {
        let releases = vec![release("0.3.0-beta.1", true), release("0.2.0", false)];
        let picked = pick_release(&releases, UpdateChannel::Dev, "0.1.0").unwrap();
        assert_eq!(picked.tag_name, "0.3.0-beta.1");
    }

    #[test]
    fn auto_channel_follows_current_versions_track() {
        let releases = vec![release("0.3.0-beta.1", true), release("0.2.0", false)];
        assert_eq!(
            pick_release(&releases, UpdateChannel::Auto, "0.1.0-beta.0").unwrap().tag_name,
            "0.3.0-beta.1"
        );
        assert_eq!(
            pick_release(&releases, UpdateChannel::Auto, "0.1.0").unwrap().tag_name,
            "0.2.0"
        );
    }

    #[test]
    fn no_matching_release_returns_none() {
        let releases = vec![release("0.3.0-beta.1", true)];
        assert!(pick_release(&releases, UpdateChannel::Stable, "0.1.0").is_none());
    }
}
