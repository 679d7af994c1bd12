//! Runtime assembly.
//!
//! Wires the loader, registry, context store, dispatcher and scheduler
//! together from a [`TsubakiConfig`] and drives their lifecycle: load
//! plugins, watch for changes, dispatch inbound events, tear down.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tsubaki_core::economy::{BoxedEconomy, FreeEconomy};
use tsubaki_core::event::Event;
use tsubaki_core::gateway::Endpoints;
use tsubaki_core::settings::{BoxedConfigStore, MemoryConfig};
use tsubaki_framework::context_store::ContextStore;
use tsubaki_framework::dispatcher::Dispatcher;
use tsubaki_framework::loader::ModuleLoader;
use tsubaki_framework::registry::HandlerRegistry;
use tsubaki_framework::scheduler::{BoxedScheduler, CronScheduler};

use crate::config::TsubakiConfig;
use crate::error::RuntimeResult;
use crate::watcher::PluginWatcher;

/// Builder for [`Runtime`], allowing collaborator overrides.
pub struct RuntimeBuilder {
    config: TsubakiConfig,
    config_store: Option<BoxedConfigStore>,
    economy: Option<BoxedEconomy>,
    scheduler: Option<BoxedScheduler>,
}

impl RuntimeBuilder {
    pub fn new(config: TsubakiConfig) -> Self {
        Self {
            config,
            config_store: None,
            economy: None,
            scheduler: None,
        }
    }

    /// Replaces the default in-memory config store seeded from
    /// `config.access`.
    pub fn config_store(mut self, store: BoxedConfigStore) -> Self {
        self.config_store = Some(store);
        self
    }

    /// Wires an economy ledger; without one every handler cost is waived.
    pub fn economy(mut self, economy: BoxedEconomy) -> Self {
        self.economy = Some(economy);
        self
    }

    pub fn scheduler(mut self, scheduler: BoxedScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let config_store = self
            .config_store
            .unwrap_or_else(|| Arc::new(MemoryConfig::new(self.config.access.clone())));
        let economy = self.economy.unwrap_or_else(|| Arc::new(FreeEconomy));
        let scheduler = self.scheduler.unwrap_or_else(|| Arc::new(CronScheduler::new()));

        let registry = Arc::new(HandlerRegistry::new());
        let contexts = ContextStore::new();
        let endpoints = Arc::new(Endpoints::new());
        let loader = ModuleLoader::new(
            Arc::clone(&registry),
            Arc::clone(&contexts),
            scheduler,
            self.config.plugins.dirs.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            contexts,
            Arc::clone(&endpoints),
            config_store,
            economy,
        ));

        Arc::new(Runtime {
            config: self.config,
            endpoints,
            loader,
            dispatcher,
            watcher: Mutex::new(None),
            watch_task: Mutex::new(None),
        })
    }
}

/// The assembled bot runtime.
pub struct Runtime {
    config: TsubakiConfig,
    endpoints: Arc<Endpoints>,
    loader: Arc<ModuleLoader>,
    dispatcher: Arc<Dispatcher>,
    watcher: Mutex<Option<PluginWatcher>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn builder(config: TsubakiConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Gateway endpoint registry, for the gateway collaborator.
    pub fn endpoints(&self) -> &Arc<Endpoints> {
        &self.endpoints
    }

    /// The module loader, for registering plugin factories before
    /// [`start`](Runtime::start).
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// Loads all plugins and, when configured, starts hot reloading.
    ///
    /// A watcher failure degrades to running without hot reload.
    pub async fn start(&self) -> RuntimeResult<()> {
        let loaded = self.loader.load_all().await;
        info!(modules = loaded, "runtime started");

        if self.config.plugins.watch {
            match PluginWatcher::start(&self.config.plugins.dirs) {
                Ok((watcher, rx)) => {
                    *self.watcher.lock() = Some(watcher);
                    let loader = Arc::clone(&self.loader);
                    *self.watch_task.lock() = Some(tokio::spawn(loader.watch(rx)));
                }
                Err(err) => {
                    warn!(error = %err, "hot reload unavailable, continuing without it");
                }
            }
        }
        Ok(())
    }

    /// Starts the runtime and blocks until Ctrl-C, then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
        }
        self.shutdown().await;
        Ok(())
    }

    /// Dispatches one inbound event on its own task.
    pub fn handle_event(&self, event: Event) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            dispatcher.dispatch(event).await;
        })
    }

    /// Parses and dispatches a raw gateway frame.
    pub fn handle_raw(&self, raw: &str) -> Result<JoinHandle<()>, serde_json::Error> {
        Ok(self.handle_event(Event::from_json(raw)?))
    }

    /// Stops watching and unloads every plugin.
    pub async fn shutdown(&self) {
        if let Some(task) = self.watch_task.lock().take() {
            task.abort();
        }
        *self.watcher.lock() = None;
        self.loader.unload_all().await;
        info!("runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tsubaki_core::Segment;
    use tsubaki_framework::decl::HandlerDecl;
    use tsubaki_framework::plugin::{
        Flow, HandlerContext, HandlerResult, Plugin, PluginManifest,
    };

    static PINGS: AtomicU32 = AtomicU32::new(0);

    struct Ping;

    #[async_trait]
    impl Plugin for Ping {
        fn manifest(&self) -> PluginManifest {
            PluginManifest::new("ping").log(false)
        }

        fn handlers(&self) -> Vec<HandlerDecl> {
            vec![HandlerDecl::command("ping", "^ping$")]
        }

        async fn call(&self, _method: &str, _ctx: &HandlerContext) -> HandlerResult {
            PINGS.fetch_add(1, Ordering::SeqCst);
            Ok(Flow::Handled)
        }
    }

    fn ping_factory() -> Vec<Box<dyn Plugin>> {
        vec![Box::new(Ping)]
    }

    #[tokio::test]
    async fn end_to_end_dispatch() {
        let tmp = TempDir::new().unwrap();
        let module = tmp.path().join("ping");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("plugin.toml"), "").unwrap();

        let config = TsubakiConfig {
            plugins: crate::config::PluginsConfig {
                dirs: vec![tmp.path().to_path_buf()],
                watch: false,
            },
            ..Default::default()
        };
        let runtime = Runtime::builder(config).build();
        runtime.loader().register_factory("ping", ping_factory);
        runtime.start().await.unwrap();

        let event = Event {
            message_type: Some("group".into()),
            self_id: 1,
            user_id: Some(2000),
            group_id: Some(3000),
            message: vec![Segment::text("ping")],
            ..Event::default()
        };
        runtime.handle_event(event).await.unwrap();
        assert_eq!(PINGS.load(Ordering::SeqCst), 1);

        runtime.shutdown().await;
    }
}
