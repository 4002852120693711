use std::{path::PathBuf, sync::OnceLock};

use config::{Config, File};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("The configuration has already been initialized")]
    ConfigAlreadyInitialized,

    #[error("Unable to read the configuration file: {0}")]
    UnableToReadConfig(#[from] config::ConfigError),
}

/// Compile-time-defaulted configuration of the engine, optionally overridden by a `ferrite.toml`
/// file. Unlike the UCI options, these values are read once at startup.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FerriteConfig {
    /// Name reported to the GUI. Should be "Ferrite" except for testing builds.
    pub name: String,

    /// Number of threads used by the perft command.
    pub perft_threads: u32,

    /// Indicates if numeric output should be precise. When false, some output is printed in a
    /// more human-readable form.
    pub precise: bool,
}

impl Default for FerriteConfig {
    fn default() -> Self {
        Self { name: String::from("Ferrite"), perft_threads: num_cpus::get() as u32, precise: false }
    }
}

static CONFIG: OnceLock<FerriteConfig> = OnceLock::new();

/// Returns the configuration of the engine, initializing it with defaults if `initialize` was
/// never called.
pub fn get_config() -> &'static FerriteConfig {
    CONFIG.get_or_init(FerriteConfig::default)
}

fn find_config_file() -> Option<PathBuf> {
    const CONFIG_FILENAME: &str = "ferrite.toml";

    let candidates = [PathBuf::from(CONFIG_FILENAME), PathBuf::from("assets/config").join(CONFIG_FILENAME)];
    candidates.into_iter().find(|path| path.exists())
}

/// Initializes the configuration, reading `ferrite.toml` from the current directory or
/// `assets/config/` when present. Without a file the compiled-in defaults apply; the engine must
/// run uninstalled.
pub fn initialize(perft_threads: Option<u32>, precise: bool) -> Result<(), ConfigError> {
    let mut config = match find_config_file() {
        Some(path) => {
            let settings = Config::builder().add_source(File::from(path)).build()?;
            settings.try_deserialize::<FerriteConfig>()?
        }
        None => FerriteConfig::default(),
    };

    config.perft_threads = perft_threads.unwrap_or(config.perft_threads);
    config.precise = config.precise || precise;

    CONFIG.set(config).map_err(|_| ConfigError::ConfigAlreadyInitialized)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_a_file() {
        let config = get_config();
        assert!(!config.name.is_empty());
        assert!(config.perft_threads >= 1);
    }
}
