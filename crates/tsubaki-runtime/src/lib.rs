//! Runtime orchestration for the Tsubaki bot framework: configuration
//! loading, logging setup, plugin directory watching and runtime assembly.
//!
//! A typical entry point:
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().load()?;
//! logging::init_from_config(&config.logging);
//!
//! let runtime = Runtime::builder(config).build();
//! runtime.loader().register_factory("greeter", greeter_factory);
//! runtime.start().await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod watcher;

pub use config::{ConfigError, ConfigLoader, TsubakiConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{Runtime, RuntimeBuilder};
pub use watcher::PluginWatcher;
