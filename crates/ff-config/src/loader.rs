use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    error::{ConfigError, Result},
    schema::FireFrpConfig,
};

const CONFIG_FILENAME: &str = "firefrp.json";

/// Discover and load config from standard locations (§4.2, §6.6).
///
/// Search order:
/// 1. `./firefrp.json` (project-local)
/// 2. `~/.config/firefrp/firefrp.json` (user-global)
///
/// Returns `FireFrpConfig::default()` if no file is found. A file that
/// exists but fails to parse is a hard error — unlike the discovery miss,
/// a bad file is not silently papered over, since it may mean a user
/// bungled a hand-edit and config defaults aren't what they have in mind.
pub fn discover_and_load() -> Result<FireFrpConfig> {
    match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(FireFrpConfig::default())
        },
    }
}

/// Load and parse a config file at an explicit path.
pub fn load_config(path: &Path) -> Result<FireFrpConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let config = merge_known_and_deprecated(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if config.has_insecure_defaults() {
        warn!(
            path = %path.display(),
            "frps.authToken or frps.adminPassword is still at its placeholder value; \
             set real secrets before exposing this node"
        );
    }
    Ok(config)
}

/// Split a raw JSON document into the schema's known fields plus whatever
/// the schema doesn't recognise, filing the latter under `deprecated`
/// rather than dropping them on the floor.
///
/// This is a manual classification step rather than `#[serde(flatten)]`,
/// because §6.6 wants unknown keys collected into a nested `deprecated`
/// sub-object, not merged back into the top level.
fn merge_known_and_deprecated(
    mut value: serde_json::Value,
) -> std::result::Result<FireFrpConfig, serde_json::Error> {
    let known = FireFrpConfig::known_top_level_keys();
    let mut extra = serde_json::Map::new();

    if let Some(obj) = value.as_object_mut() {
        let unknown_keys: Vec<String> = obj
            .keys()
            .filter(|k| !known.contains(k.as_str()))
            .cloned()
            .collect();
        for key in unknown_keys {
            if let Some(v) = obj.remove(&key) {
                extra.insert(key, v);
            }
        }

        // A previously saved `deprecated` bucket is folded into `extra`
        // rather than left for serde to deserialize, so entries from an
        // older version that have since become unknown don't get lost
        // under a double-nested `deprecated.deprecated`.
        if let Some(serde_json::Value::Object(existing)) = obj.remove("deprecated") {
            for (k, v) in existing {
                extra.entry(k).or_insert(v);
            }
        }
    }

    let mut config: FireFrpConfig = serde_json::from_value(value)?;
    for (k, v) in extra {
        config.deprecated.insert(k, v);
    }
    Ok(config)
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }

    let dir = config_dir()?;
    let candidate = dir.join(CONFIG_FILENAME);
    candidate.exists().then_some(candidate)
}

/// Returns the user-global config directory (`~/.config/firefrp/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "firefrp").map(|d| d.config_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default path under
/// the user-global config directory.
pub fn find_or_default_config_path() -> Result<PathBuf> {
    if let Some(path) = find_config_file() {
        return Ok(path);
    }
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join(CONFIG_FILENAME))
}

/// Serialize `config` to JSON and atomically write it to `path` (write to
/// a `.tmp` sibling, then rename over the target), so a crash mid-write
/// never leaves a truncated config file behind.
pub fn save_config_to(config: &FireFrpConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json.as_bytes()).map_err(|source| ConfigError::Write {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

/// Save `config` to the discovered or default user-global config path.
pub fn save_config(config: &FireFrpConfig) -> Result<PathBuf> {
    let path = find_or_default_config_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_round_trips_through_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        assert!(!path.exists());

        let config = FireFrpConfig::default();
        save_config_to(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.server_port, config.server_port);
        assert_eq!(loaded.frps.bind_port, config.frps.bind_port);
    }

    #[test]
    fn unknown_top_level_keys_land_in_deprecated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"{"serverPort": 9090, "legacyWebhookUrl": "https://example.invalid/hook"}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server_port, 9090);
        assert_eq!(
            config.deprecated.get("legacyWebhookUrl").and_then(|v| v.as_str()),
            Some("https://example.invalid/hook")
        );
    }

    #[test]
    fn deprecated_bucket_survives_a_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let mut config = FireFrpConfig::default();
        config
            .deprecated
            .insert("oldFeatureFlag".to_string(), serde_json::Value::Bool(true));

        save_config_to(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(
            loaded.deprecated.get("oldFeatureFlag"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn malformed_file_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(load_config(&path).is_err());
    }
}
