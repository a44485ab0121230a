//! Provisioning, configuration, and lifecycle supervision of the `frps`
//! reverse-proxy server subprocess (§4.7).

pub mod admin_client;
pub mod binary;
pub mod config_gen;
pub mod error;
pub mod supervisor;

pub use admin_client::{AdminClient, ProxyInfo, ServerInfo};
pub use binary::{archive_url, binary_path, ensure_binary};
pub use config_gen::{escape_toml_string, render_frps_toml, FrpsConfigInput};
pub use error::{FrpsError, Result};
pub use supervisor::{FrpsSupervisor, SupervisorState, SupervisorStatus};
