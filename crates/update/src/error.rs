use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("repository URL is not a GitHub repository: {0}")]
    UnsupportedRepository(String),

    #[error("no release matches the {0} channel")]
    NoMatchingRelease(String),

    #[error("release has no asset for this platform ({os}/{arch})")]
    NoMatchingAsset { os: &'static str, arch: &'static str },

    #[error("archive entry {0} not found for replacement")]
    MissingArchiveEntry(String),

    #[error("could not determine the running executable's path")]
    UnknownInstallRoot,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] firefrp_config::ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UpdateError>;
