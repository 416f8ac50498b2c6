//! Configuration management
//!
//! The TOML file carries runner, bot and delegate settings. AWS credentials
//! and a handful of overrides come from the environment, optionally seeded
//! from a `.env` file.

pub mod aws;
pub mod store;

pub use aws::{AwsSettings, DEFAULT_REGION};
pub use store::{BotConfig, Config, DelegateConfig, ServerConfig, WeatherConfig};

use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "delegated-agent.toml";

/// Load `.env` from the working directory, replacing existing variables.
///
/// Returns the path that was loaded, if any. A missing file is not an error.
pub fn load_dotenv() -> Option<PathBuf> {
    loaded(dotenvy::dotenv_override())
}

/// Load a specific env file, replacing existing variables
pub fn load_dotenv_file<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    let path = path.as_ref();
    loaded(dotenvy::from_path_override(path).map(|_| path.to_path_buf()))
}

fn loaded(result: dotenvy::Result<PathBuf>) -> Option<PathBuf> {
    match result {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => None,
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
            None
        }
    }
}

/// Find the configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    Config::default_path().filter(|path| path.exists())
}

/// Get the configuration directory path
pub fn get_config_dir() -> Option<PathBuf> {
    use dirs::config_dir;
    use home::home_dir;

    if let Some(dir) = config_dir() {
        return Some(dir.join("delegated-agent"));
    }

    if let Some(home) = home_dir() {
        return Some(home.join(".config").join("delegated-agent"));
    }

    None
}
