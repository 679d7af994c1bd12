//! Plugin framework for the Tsubaki bot: module loading, handler
//! registration, event dispatch, conversational contexts and cron
//! scheduling.
//!
//! The flow through this crate: the [`loader::ModuleLoader`] instantiates
//! plugins and publishes their handlers to the [`registry::HandlerRegistry`];
//! the [`dispatcher::Dispatcher`] walks a registry snapshot for each inbound
//! event, checking the [`gates`] chain and honoring context bindings from the
//! [`context_store::ContextStore`]; cron handlers run through the
//! [`scheduler::JobScheduler`].

pub mod context_store;
pub mod decl;
pub mod dispatcher;
pub mod error;
mod gates;
pub mod loader;
pub mod module;
pub mod plugin;
pub mod registry;
pub mod scheduler;

pub use context_store::{ContextHit, ContextStore};
pub use decl::{HandlerDecl, HandlerKind, Permission};
pub use dispatcher::Dispatcher;
pub use error::{BoxError, LoadError, PluginError, ScheduleError};
pub use loader::{ChangeKind, FileChange, ModuleLoader};
pub use module::{ENTRY_FILE, ModuleDescriptor, PLUGIN_MODULES, PluginFactory};
pub use plugin::{
    ContextPolicy, ContextScope, DEFAULT_CONTEXT_TTL, Flow, HandlerContext, HandlerResult,
    Plugin, PluginManifest,
};
pub use registry::{CompiledKind, HandlerEntry, HandlerRegistry, InstanceRecord, RegistrySnapshot};
pub use scheduler::{BoxedScheduler, CronScheduler, JobFn, JobHandle, JobScheduler};
