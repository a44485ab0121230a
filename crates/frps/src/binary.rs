use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{FrpsError, Result};

#[cfg(windows)]
const BIN_SUFFIX: &str = ".exe";
#[cfg(not(windows))]
const BIN_SUFFIX: &str = "";

pub fn binary_path(bin_dir: &Path) -> PathBuf {
    bin_dir.join(format!("frps{BIN_SUFFIX}"))
}

/// Ensures the frps binary exists at `bin_dir` and matches `version`,
/// downloading and installing it otherwise (§4.7 `ensureBinary`).
pub async fn ensure_binary(bin_dir: &Path, version: &str) -> Result<PathBuf> {
    let path = binary_path(bin_dir);

    if path.exists() {
        match installed_version(&path).await {
            Ok(installed) if version_matches(&installed, version) => {
                debug!(path = %path.display(), version, "frps binary already matches pinned version");
                return Ok(path);
            },
            Ok(installed) => {
                info!(installed, pinned = version, "frps version mismatch, reinstalling");
            },
            Err(e) => {
                warn!(error = %e, "failed to query installed frps version, reinstalling");
            },
        }
    }

    download_and_install(bin_dir, version).await?;
    Ok(path)
}

async fn installed_version(path: &Path) -> std::result::Result<String, std::io::Error> {
    let output = tokio::process::Command::new(path).arg("--version").output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn version_matches(installed_output: &str, pinned: &str) -> bool {
    installed_output
        .split_whitespace()
        .any(|tok| tok.trim_start_matches('v') == pinned)
        || installed_output.contains(pinned)
}

fn platform_os() -> Result<&'static str> {
    match std::env::consts::OS {
        "linux" => Ok("linux"),
        "macos" => Ok("darwin"),
        "windows" => Ok("windows"),
        other => Err(FrpsError::UnsupportedPlatform {
            os: other.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }),
    }
}

fn platform_arch() -> Result<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        "x86" => Ok("386"),
        "arm" => Ok("arm"),
        other => Err(FrpsError::UnsupportedPlatform {
            os: std::env::consts::OS.to_string(),
            arch: other.to_string(),
        }),
    }
}

/// The official release archive URL pattern (§6.5).
pub fn archive_url(version: &str, os: &str, arch: &str, ext: &str) -> String {
    format!(
        "https://github.com/fatedier/frp/releases/download/v{version}/frp_{version}_{os}_{arch}.{ext}"
    )
}

async fn download_and_install(bin_dir: &Path, version: &str) -> Result<()> {
    let os = platform_os()?;
    let arch = platform_arch()?;

    if os == "windows" {
        // The workspace carries `tar`/`flate2` for archive extraction, not
        // a zip crate — frps servers are overwhelmingly run on Linux, so
        // Windows support is left for a follow-up rather than pulling in a
        // new dependency for one platform (see DESIGN.md).
        return Err(FrpsError::UnsupportedArchive("zip".to_string()));
    }
    let ext = "tar.gz";

    let url = archive_url(version, os, arch, ext);
    info!(url, "downloading frps release");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .map_err(|source| FrpsError::Download {
            url: url.clone(),
            source,
        })?;
    let bytes = client
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|source| FrpsError::Download {
            url: url.clone(),
            source,
        })?
        .bytes()
        .await
        .map_err(|source| FrpsError::Download {
            url: url.clone(),
            source,
        })?;

    std::fs::create_dir_all(bin_dir).map_err(|source| FrpsError::Io {
        path: bin_dir.to_path_buf(),
        source,
    })?;

    extract_frps_binary(&bytes, bin_dir)?;
    info!(path = %binary_path(bin_dir).display(), "installed frps binary");
    Ok(())
}

/// Extracts `frps` (or `frps.exe`) from the archive's top-level directory
/// (§6.5) and marks it executable.
fn extract_frps_binary(archive_bytes: &[u8], bin_dir: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(decoder);
    let target = binary_path(bin_dir);

    let mut found = false;
    for entry in archive.entries().map_err(|source| FrpsError::Extract {
        path: bin_dir.to_path_buf(),
        source,
    })? {
        let mut entry = entry.map_err(|source| FrpsError::Extract {
            path: bin_dir.to_path_buf(),
            source,
        })?;
        let entry_path = entry.path().map_err(|source| FrpsError::Extract {
            path: bin_dir.to_path_buf(),
            source,
        })?;
        let file_name = entry_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name == format!("frps{BIN_SUFFIX}") {
            entry.unpack(&target).map_err(|source| FrpsError::Extract {
                path: target.clone(),
                source,
            })?;
            found = true;
            break;
        }
    }

    if !found {
        return Err(FrpsError::BinaryMissingFromArchive { suffix: BIN_SUFFIX });
    }

    make_executable(&target)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|source| FrpsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matching_strips_leading_v() {
        assert!(version_matches("frps version v0.61.1", "0.61.1"));
        assert!(version_matches("0.61.1", "0.61.1"));
        assert!(!version_matches("frps version v0.60.0", "0.61.1"));
    }

    #[test]
    fn archive_url_follows_the_pinned_pattern() {
        assert_eq!(
            archive_url("0.61.1", "linux", "amd64", "tar.gz"),
            "https://github.com/fatedier/frp/releases/download/v0.61.1/frp_0.61.1_linux_amd64.tar.gz"
        );
    }
}
