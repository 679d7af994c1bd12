//! Framework error types.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error for plugin-defined failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while loading or reloading a plugin module.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no plugin factory registered for module `{0}`")]
    UnknownModule(String),
    #[error("invalid command pattern `{pattern}` in {plugin}::{method}: {source}")]
    Pattern {
        plugin: String,
        method: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("unknown event target `{target}` in {plugin}::{method}")]
    Target {
        plugin: String,
        method: String,
        target: String,
    },
    #[error("invalid cron expression `{expr}` in {plugin}::{method}: {source}")]
    Cron {
        plugin: String,
        method: String,
        expr: String,
        #[source]
        source: ScheduleError,
    },
    #[error("plugin `{plugin}` failed to initialize: {source}")]
    Init {
        plugin: String,
        #[source]
        source: BoxError,
    },
}

/// Errors raised by the cron scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unparseable cron expression `{expr}`: {source}")]
    Parse {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("cron expression `{0}` never fires")]
    NeverFires(String),
}

/// Errors raised from inside a plugin handler call.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A handler declaration names a method the plugin does not route.
    #[error("plugin has no handler method `{0}`")]
    UnknownMethod(String),
}
