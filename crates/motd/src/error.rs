#[derive(thiserror::Error, Debug)]
pub enum MotdError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer at {addr} closed the connection before a status response arrived")]
    ConnectionClosed { addr: String },

    #[error("malformed status response from {addr}: {reason}")]
    MalformedResponse { addr: String, reason: String },

    #[error("status probe against {addr} timed out")]
    Timeout { addr: String },

    #[error("packet from {addr} exceeded the maximum accepted size")]
    PacketTooLarge { addr: String },
}

pub type Result<T> = std::result::Result<T, MotdError>;
