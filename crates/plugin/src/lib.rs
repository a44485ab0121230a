//! frps HTTP plugin endpoint: the sole gate between the tunnel daemon and
//! the credential lifecycle (§4.8).

pub mod error;
pub mod handler;
pub mod loopback;
pub mod types;

pub use error::{PluginError, Result};
pub use handler::{router, PluginState};
pub use types::{PluginRequest, PluginResponse};
