//! Download → extract → replace → marker-file half of the update flow
//! (§4.12). Grounded on `frps::binary`'s download/extract/executable-bit
//! shape, generalised from "install one named binary" to "replace a fixed
//! allow-list of paths from an archive", since FireFrp's own release asset
//! ships more than just the executable.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, UpdateError};
use crate::release_feed::{GithubRelease, ReleaseAsset};

#[cfg(windows)]
const EXE_SUFFIX: &str = ".exe";
#[cfg(not(windows))]
const EXE_SUFFIX: &str = "";

/// Name of the marker file dropped in the data directory after a
/// successful apply, checked again on the next startup (§4.14 step 9).
const MARKER_FILE_NAME: &str = ".firefrp-update-marker";

/// Paths inside the release archive's top-level directory that get
/// replaced in the install root. Everything else in the archive (docs,
/// license, sample config) is ignored; nothing outside this list is ever
/// touched, so the running config/data directory is never at risk.
fn replace_allow_list() -> Vec<String> {
    vec![format!("firefrp{EXE_SUFFIX}")]
}

fn platform_os() -> Result<&'static str> {
    match std::env::consts::OS {
        "linux" => Ok("linux"),
        "macos" => Ok("darwin"),
        "windows" => Ok("windows"),
        _ => Err(UpdateError::NoMatchingAsset { os: std::env::consts::OS, arch: std::env::consts::ARCH }),
    }
}

fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Picks the asset matching this platform's naming convention
/// (`firefrp_<os>_<arch>.tar.gz`), the same scheme `frps::binary` uses for
/// its own release assets.
fn pick_asset<'a>(release: &'a GithubRelease) -> Result<&'a ReleaseAsset> {
    let os = platform_os()?;
    let arch = platform_arch();
    let expected_suffix = format!("{os}_{arch}.tar.gz");
    release
        .assets
        .iter()
        .find(|a| a.name.ends_with(&expected_suffix))
        .ok_or(UpdateError::NoMatchingAsset { os, arch })
}

/// Downloads the matching asset, extracts it to a temp directory, and
/// replaces each path in [`replace_allow_list`] atomically (per-file
/// rename) in `install_root`. Writes the marker file into `data_dir`
/// before returning. Does not exit the process — that's the caller's job,
/// once it has flushed whatever it needs to before handing control to an
/// external supervisor.
pub async fn download_and_apply(
    client: &reqwest::Client,
    release: &GithubRelease,
    install_root: &Path,
    data_dir: &Path,
) -> Result<()> {
    let asset = pick_asset(release)?;
    info!(url = %asset.browser_download_url, "downloading update asset");

    let bytes = client
        .get(&asset.browser_download_url)
        .header(reqwest::header::USER_AGENT, "firefrp-update")
        .timeout(std::time::Duration::from_secs(120))
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let staging = tempfile::tempdir().map_err(|source| UpdateError::Io { path: std::env::temp_dir(), source })?;
    extract_archive(&bytes, staging.path())?;

    for relative in replace_allow_list() {
        let extracted = find_entry(staging.path(), &relative)
            .ok_or_else(|| UpdateError::MissingArchiveEntry(relative.clone()))?;
        let target = install_root.join(&relative);
        replace_file_atomically(&extracted, &target)?;
    }

    write_marker(data_dir, &release.tag_name)?;
    info!(version = %release.tag_name, "update staged, marker written");
    Ok(())
}

fn extract_archive(archive_bytes: &[u8], dest: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest).map_err(|source| UpdateError::Io { path: dest.to_path_buf(), source })
}

/// Archives are a top-level directory wrapping the payload (matching
/// frps's own release layout); search one level deep for `relative`'s
/// file name rather than assuming an exact nested path.
fn find_entry(root: &Path, file_name: &str) -> Option<PathBuf> {
    let direct = root.join(file_name);
    if direct.exists() {
        return Some(direct);
    }
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let candidate = path.join(file_name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn replace_file_atomically(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| UpdateError::Io { path: parent.to_path_buf(), source: e })?;
    }
    make_executable(source)?;
    let staged_target = target.with_extension("update-tmp");
    std::fs::copy(source, &staged_target)
        .map_err(|e| UpdateError::Io { path: staged_target.clone(), source: e })?;
    make_executable(&staged_target)?;
    std::fs::rename(&staged_target, target).map_err(|e| UpdateError::Io { path: target.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|source| UpdateError::Io { path: path.to_path_buf(), source })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn marker_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MARKER_FILE_NAME)
}

fn write_marker(data_dir: &Path, version: &str) -> Result<()> {
    let path = marker_path(data_dir);
    std::fs::write(&path, version).map_err(|source| UpdateError::Io { path, source })
}

/// What to do with a marker left over from a prior update (§4.14 step 9):
/// `Applied` means the restart landed on the expected version and callers
/// should broadcast a success notification; `Stale` means it didn't (a
/// failed or superseded update) and nothing is announced. Either way the
/// marker file is already gone once this returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    Applied { version: String },
    Stale,
}

/// Reads and deletes the marker file, if present, comparing its contents
/// against the currently running version.
pub fn consume_startup_marker(data_dir: &Path, running_version: &str) -> Option<MarkerOutcome> {
    let path = marker_path(data_dir);
    let contents = std::fs::read_to_string(&path).ok()?;
    let _ = std::fs::remove_file(&path);

    let marked_version = contents.trim();
    if marked_version == running_version {
        Some(MarkerOutcome::Applied { version: marked_version.to_string() })
    } else {
        warn!(marked_version, running_version, "stale update marker found, discarding");
        Some(MarkerOutcome::Stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_round_trips_when_versions_match() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), "0.3.0").unwrap();

        let outcome = consume_startup_marker(dir.path(), "0.3.0");
        assert_eq!(outcome, Some(MarkerOutcome::Applied { version: "0.3.0".to_string() }));
        assert!(!marker_path(dir.path()).exists());
    }

    #[test]
    fn marker_is_stale_on_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), "0.3.0").unwrap();

        let outcome = consume_startup_marker(dir.path(), "0.4.0");
        assert_eq!(outcome, Some(MarkerOutcome::Stale));
        assert!(!marker_path(dir.path()).exists());
    }

    #[test]
    fn missing_marker_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(consume_startup_marker(dir.path(), "0.3.0"), None);
    }

    #[test]
    fn replace_file_atomically_copies_and_preserves_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("new-binary");
        std::fs::write(&source, b"new contents").unwrap();
        let target = dir.path().join("install").join("firefrp");

        replace_file_atomically(&source, &target).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
        assert!(!target.with_extension("update-tmp").exists());
    }

    #[test]
    fn find_entry_searches_one_level_of_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("firefrp-0.3.0-linux-amd64");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("firefrp"), b"binary").unwrap();

        let found = find_entry(dir.path(), "firefrp").unwrap();
        assert_eq!(found, nested.join("firefrp"));
    }
}
