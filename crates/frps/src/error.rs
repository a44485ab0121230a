use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum FrpsError {
    #[error("unsupported platform: os={os} arch={arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("no release asset available for this platform/extension ({0}) — only tar.gz archives are extracted")]
    UnsupportedArchive(String),

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to extract archive into {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("binary not found in archive (expected frps{suffix})")]
    BinaryMissingFromArchive { suffix: &'static str },

    #[error("failed to spawn frps: {0}")]
    Spawn(std::io::Error),

    #[error("frps did not become ready within the admin-API poll window")]
    NotReady,

    #[error("admin API request failed: {0}")]
    AdminApi(#[from] reqwest::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FrpsError>;
