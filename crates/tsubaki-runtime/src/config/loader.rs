//! Configuration loader using figment.
//!
//! Sources are layered, later overriding earlier:
//!
//! 1. Built-in defaults
//! 2. `tsubaki.toml` (from a given path or the search paths)
//! 3. Environment variables (`TSUBAKI_*`, `__` as the section separator)
//!
//! For example `TSUBAKI_ACCESS__MASTER=100` maps to `access.master = 100`.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{debug, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::TsubakiConfig;

/// Default config file name searched in each search path.
pub const CONFIG_FILE: &str = "tsubaki.toml";

/// Layered configuration loader.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    config_file: Option<PathBuf>,
    load_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            config_file: None,
            load_env: true,
        }
    }

    /// Adds a directory to search for `tsubaki.toml`.
    pub fn search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads a specific configuration file instead of searching.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables the environment variable layer.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<TsubakiConfig> {
        let mut figment = Figment::from(Serialized::defaults(TsubakiConfig::default()));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            figment = figment.merge(Toml::file(path));
        } else {
            let mut paths = self.search_paths.clone();
            if paths.is_empty()
                && let Ok(cwd) = std::env::current_dir()
            {
                paths.push(cwd);
            }
            let mut found = false;
            for dir in &paths {
                let candidate = dir.join(CONFIG_FILE);
                if candidate.exists() {
                    debug!(path = %candidate.display(), "loading configuration file");
                    figment = figment.merge(Toml::file(candidate));
                    found = true;
                    break;
                }
            }
            if !found {
                warn!("no configuration file found, using defaults");
            }
        }

        if self.load_env {
            figment = figment.merge(
                Env::prefixed("TSUBAKI_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        let config = figment.extract().map_err(Box::new)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads() {
        let config = ConfigLoader::new().without_env().load().unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.access.master, 0);
        assert!(config.plugins.watch);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[access]
master = 100
black_users = [7]

[plugins]
dirs = ["a", "b"]
watch = false
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .file(&path)
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.access.master, 100);
        assert_eq!(config.access.black_users, vec![7]);
        assert_eq!(config.plugins.dirs.len(), 2);
        assert!(!config.plugins.watch);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = ConfigLoader::new()
            .file("/nonexistent/tsubaki.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
