#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("bot transport is not connected")]
    Disconnected,

    #[error("call to {action} timed out waiting for a response")]
    Timeout { action: String },

    #[error("call to {action} failed: {reason}")]
    ApiFailed { action: String, reason: String },

    #[error("failed to encode outgoing frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid ws url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, BotError>;
