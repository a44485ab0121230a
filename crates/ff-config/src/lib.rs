pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, Result};
pub use loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config, save_config_to};
pub use schema::{
    BotConfig, FireFrpConfig, FrpsConfig, ServerIdentity, UpdateChannel, UpdatesConfig,
    DEFAULT_FRP_VERSION, INSECURE_ADMIN_PASSWORD, INSECURE_AUTH_TOKEN,
};
