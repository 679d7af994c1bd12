//! Plugin module discovery.
//!
//! A module is a directory carrying a `plugin.toml` entry file. The entry
//! file names the factory that produces the module's plugin instances;
//! factories are registered either statically through the
//! [`PLUGIN_MODULES`] distributed slice or dynamically on the loader.

use std::path::Path;

use linkme::distributed_slice;
use serde::Deserialize;

use crate::error::LoadError;
use crate::plugin::Plugin;

/// Entry file name marking a directory as a plugin module.
pub const ENTRY_FILE: &str = "plugin.toml";

/// A factory producing a module's plugin instances.
pub type PluginFactory = fn() -> Vec<Box<dyn Plugin>>;

/// One statically registered plugin module.
pub struct ModuleDescriptor {
    pub name: &'static str,
    pub create: PluginFactory,
}

/// Registry of compiled-in plugin modules. Add an entry with
/// `#[distributed_slice(PLUGIN_MODULES)]`.
#[distributed_slice]
pub static PLUGIN_MODULES: [ModuleDescriptor];

/// Looks up a compiled-in module by name.
pub fn builtin_module(name: &str) -> Option<&'static ModuleDescriptor> {
    PLUGIN_MODULES.iter().find(|module| module.name == name)
}

/// Parsed `plugin.toml` entry file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModuleManifest {
    /// Factory name. Defaults to the module directory's name.
    pub module: Option<String>,
}

impl ModuleManifest {
    /// Reads and parses the entry file at `path`.
    pub async fn read(path: &Path) -> Result<Self, LoadError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&raw).map_err(|source| LoadError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The factory name, falling back to the directory name of `dir`.
    pub fn factory_name(&self, dir: &Path) -> String {
        match &self.module {
            Some(name) => name.clone(),
            None => dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}
