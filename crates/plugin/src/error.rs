#[derive(thiserror::Error, Debug)]
pub enum PluginError {
    #[error("malformed plugin request: {0}")]
    MalformedRequest(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
