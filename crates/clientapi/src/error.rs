#[derive(thiserror::Error, Debug)]
pub enum ClientApiError {
    #[error("invalid request")]
    InvalidRequest,
}

pub type Result<T> = std::result::Result<T, ClientApiError>;
