//! Runtime configuration: schema, layered loading, errors.

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_FILE, ConfigLoader};
pub use schema::{LogFormat, LogOutput, LoggingConfig, PluginsConfig, TsubakiConfig};
