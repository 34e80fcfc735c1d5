use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Reads `AppConfig` from YAML or TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.tidemark/config.yml`, or `None` if there is no home directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tidemark").join("config.yml"))
    }

    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let config = Self::parse(path, &contents)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load an explicitly given file, or the default file if it exists, or
    /// fall back to defaults. A missing explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => {
                debug!("no config file found, using defaults");
                Ok(AppConfig::default())
            }
        }
    }

    fn parse(path: &Path, contents: &str) -> Result<AppConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}
