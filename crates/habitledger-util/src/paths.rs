//! Default paths for habitledger-sync
//!
//! Paths are user-writable:
//! - Config: `$XDG_CONFIG_HOME/habitledger/config.toml` or `~/.config/habitledger/config.toml`
//! - Data: `$XDG_DATA_HOME/habitledger` or `~/.local/share/habitledger`

use std::path::PathBuf;

/// Environment variable for overriding the data directory
pub const HABITLEDGER_DATA_DIR_ENV: &str = "HABITLEDGER_DATA_DIR";

/// Environment variable for overriding the API base URL
pub const HABITLEDGER_API_URL_ENV: &str = "HABITLEDGER_API_URL";

/// Application subdirectory name
const APP_DIR: &str = "habitledger";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Database filename within the data directory
pub const STORE_FILENAME: &str = "offline.db";

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/tmp").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory, ignoring `HABITLEDGER_DATA_DIR`.
///
/// The env var is applied by the CLI on top of the configured value.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
