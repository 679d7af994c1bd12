//! # Tsubaki
//!
//! A plugin-driven chat bot framework: plugins declare command, event and
//! cron handlers; the dispatcher walks them in priority order for every
//! inbound event; modules hot-reload when their files change.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌───────────────────────────────┐
//! │ Gateway  │───▶│ Dispatcher │───▶│ prefilter > context bypass >  │
//! │ (events) │    │            │    │ priority walk over handlers   │
//! └──────────┘    └────────────┘    └───────────────────────────────┘
//!                        ▲
//!                 ┌──────┴──────┐
//!                 │  Registry   │◀── ModuleLoader (plugin dirs, hot reload)
//!                 └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tsubaki::prelude::*;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Plugin for Greeter {
//!     fn manifest(&self) -> PluginManifest {
//!         PluginManifest::new("greeter")
//!     }
//!
//!     fn handlers(&self) -> Vec<HandlerDecl> {
//!         vec![HandlerDecl::command("hello", "^hello$")]
//!     }
//!
//!     async fn call(&self, method: &str, ctx: &HandlerContext) -> HandlerResult {
//!         route_methods!(self, method, ctx, {
//!             "hello" => hello,
//!         })
//!     }
//! }
//!
//! impl Greeter {
//!     async fn hello(&self, ctx: &HandlerContext) -> HandlerResult {
//!         ctx.reply_text("hi there").await?;
//!         Ok(Flow::Handled)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let runtime = Runtime::builder(config).build();
//!     runtime.loader().register_factory("greeter", || vec![Box::new(Greeter)]);
//!     runtime.start().await?;
//!     Ok(())
//! }
//! ```

pub use tsubaki_core as core;
pub use tsubaki_framework as framework;
pub use tsubaki_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use tsubaki_core::{
        ApiError, ApiResult, Endpoint, Event, PostType, Segment, Settings,
    };
    pub use tsubaki_framework::{
        ContextScope, Flow, HandlerContext, HandlerDecl, HandlerKind, HandlerResult, Permission,
        Plugin, PluginManifest, route_methods,
    };
    pub use tsubaki_runtime::{ConfigLoader, Runtime, TsubakiConfig, logging};
}
