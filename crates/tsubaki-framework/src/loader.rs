//! The module loader.
//!
//! Walks the configured plugin directories, instantiates each module's
//! plugins through its registered factory, validates and compiles their
//! handler declarations, and publishes the result to the registry. A
//! (re)load is all-or-nothing: any failure leaves the previously loaded
//! state untouched.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tsubaki_core::event::PostType;

use crate::context_store::ContextStore;
use crate::decl::HandlerKind;
use crate::error::LoadError;
use crate::module::{self, ENTRY_FILE, ModuleManifest, PluginFactory};
use crate::registry::{CompiledKind, HandlerEntry, HandlerRegistry, InstanceRecord};
use crate::scheduler::BoxedScheduler;

/// How long file change notifications are coalesced before reloading.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// One file system change reported by the watcher.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
}

/// Loads, reloads and unloads plugin modules.
pub struct ModuleLoader {
    registry: Arc<HandlerRegistry>,
    contexts: Arc<ContextStore>,
    scheduler: BoxedScheduler,
    factories: RwLock<HashMap<String, PluginFactory>>,
    loaded: Mutex<HashMap<PathBuf, Vec<Arc<InstanceRecord>>>>,
    dirs: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        contexts: Arc<ContextStore>,
        scheduler: BoxedScheduler,
        dirs: Vec<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            contexts,
            scheduler,
            factories: RwLock::new(HashMap::new()),
            loaded: Mutex::new(HashMap::new()),
            dirs,
        })
    }

    /// Registers a plugin factory under `name`, shadowing a compiled-in
    /// module of the same name.
    pub fn register_factory(&self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.write().insert(name.into(), factory);
    }

    fn resolve_factory(&self, name: &str) -> Option<PluginFactory> {
        if let Some(factory) = self.factories.read().get(name) {
            return Some(*factory);
        }
        module::builtin_module(name).map(|descriptor| descriptor.create)
    }

    /// Scans every configured directory and loads each module found.
    /// Returns the number of modules loaded; individual failures are
    /// logged and skipped.
    pub async fn load_all(&self) -> usize {
        let mut count = 0;
        for root in self.dirs.clone() {
            count += self.scan_root(&root).await;
        }
        info!(modules = count, "plugin scan complete");
        count
    }

    async fn scan_root(&self, root: &Path) -> usize {
        let mut count = 0;
        let mut queue = VecDeque::from([root.to_path_buf()]);
        while let Some(dir) = queue.pop_front() {
            for sub in sorted_subdirs(&dir).await {
                if !sub.join(ENTRY_FILE).is_file() {
                    // Not a module itself; descend looking for modules.
                    queue.push_back(sub);
                    continue;
                }
                count += self.load_logged(&sub).await;
                // A module may bundle sub-plugins under apps/, loaded
                // after their parent.
                let apps = sub.join("apps");
                if apps.is_dir() {
                    for nested in sorted_subdirs(&apps).await {
                        if nested.join(ENTRY_FILE).is_file() {
                            count += self.load_logged(&nested).await;
                        }
                    }
                }
            }
        }
        count
    }

    async fn load_logged(&self, dir: &Path) -> usize {
        match self.load(dir).await {
            Ok(instances) => {
                info!(module = %dir.display(), instances, "module loaded");
                1
            }
            Err(err) => {
                error!(module = %dir.display(), error = %err, "module failed to load");
                0
            }
        }
    }

    /// Loads (or reloads) the module at `dir`.
    ///
    /// The new generation is fully instantiated, validated, initialized and
    /// scheduled before the old one is retired; on any failure the new
    /// generation is torn down and the old state stays published. Returns
    /// the number of plugin instances.
    pub async fn load(&self, dir: &Path) -> Result<usize, LoadError> {
        let manifest = ModuleManifest::read(&dir.join(ENTRY_FILE)).await?;
        let factory_name = manifest.factory_name(dir);
        let factory = self
            .resolve_factory(&factory_name)
            .ok_or_else(|| LoadError::UnknownModule(factory_name.clone()))?;

        let mut records = Vec::new();
        let mut entries = Vec::new();
        for plugin in factory() {
            let record = InstanceRecord::new(Arc::from(plugin));
            entries.extend(compile_entries(&record, dir)?);
            records.push(record);
        }

        // Initialize before touching any published state.
        let mut initialized: Vec<Arc<InstanceRecord>> = Vec::new();
        for record in &records {
            if let Err(source) = record.plugin.init().await {
                let name = record.name().to_string();
                for done in initialized {
                    done.plugin.destroy().await;
                }
                return Err(LoadError::Init {
                    plugin: name,
                    source,
                });
            }
            initialized.push(Arc::clone(record));
        }

        if let Err(err) = self.schedule_jobs(&records) {
            for record in &records {
                record.cancel_jobs();
                record.plugin.destroy().await;
            }
            return Err(err);
        }

        // Swap generations: old entries out, new in, one publish.
        let old = {
            let mut loaded = self.loaded.lock();
            self.registry.remove_module(dir);
            loaded.insert(dir.to_path_buf(), records.clone())
        };
        self.registry.append(entries);
        self.registry.publish();
        if let Some(old) = old {
            self.retire(old).await;
        }
        Ok(records.len())
    }

    /// Unloads the module at `dir`. Returns `false` when it was not loaded.
    pub async fn unload(&self, dir: &Path) -> bool {
        let Some(old) = self.loaded.lock().remove(dir) else {
            return false;
        };
        self.registry.remove_module(dir);
        self.registry.publish();
        self.retire(old).await;
        info!(module = %dir.display(), "module unloaded");
        true
    }

    /// Unloads every loaded module. Used at shutdown.
    pub async fn unload_all(&self) {
        let dirs: Vec<PathBuf> = self.loaded.lock().keys().cloned().collect();
        for dir in dirs {
            self.unload(&dir).await;
        }
    }

    async fn retire(&self, records: Vec<Arc<InstanceRecord>>) {
        for record in records {
            record.cancel_jobs();
            self.contexts.remove_instance(record.id);
            record.plugin.destroy().await;
        }
    }

    fn schedule_jobs(&self, records: &[Arc<InstanceRecord>]) -> Result<(), LoadError> {
        for record in records {
            for decl in record.plugin.handlers() {
                let HandlerKind::Cron { expr } = &decl.kind else {
                    continue;
                };
                let job_record = Arc::clone(record);
                let method = decl.method.clone();
                let handle = self
                    .scheduler
                    .schedule(
                        expr,
                        Box::new(move || {
                            let record = Arc::clone(&job_record);
                            let method = method.clone();
                            Box::pin(async move {
                                if record.manifest.log {
                                    info!(
                                        plugin = record.name(),
                                        method = %method,
                                        "scheduled job fired"
                                    );
                                }
                                if let Err(err) = record.plugin.run_job(&method).await {
                                    error!(
                                        plugin = record.name(),
                                        method = %method,
                                        error = %err,
                                        "scheduled job failed"
                                    );
                                }
                            })
                        }),
                    )
                    .map_err(|source| LoadError::Cron {
                        plugin: record.name().to_string(),
                        method: decl.method.clone(),
                        expr: expr.clone(),
                        source,
                    })?;
                record.jobs.lock().push(handle);
            }
        }
        Ok(())
    }

    /// Consumes watcher notifications, coalescing bursts and reloading the
    /// affected modules. Runs until the channel closes.
    pub async fn watch(self: Arc<Self>, mut rx: mpsc::Receiver<FileChange>) {
        while let Some(first) = rx.recv().await {
            let mut pending = vec![first];
            while let Ok(Some(change)) = tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                pending.push(change);
            }
            self.apply_changes(pending).await;
        }
    }

    async fn apply_changes(&self, changes: Vec<FileChange>) {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for change in changes {
            if change.path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            if let Some(dir) = self.module_dir_for(&change.path)
                && !dirs.contains(&dir)
            {
                dirs.push(dir);
            }
        }

        for dir in dirs {
            if dir.join(ENTRY_FILE).is_file() {
                debug!(module = %dir.display(), "change detected, reloading");
                if let Err(err) = self.load(&dir).await {
                    error!(module = %dir.display(), error = %err, "reload failed");
                }
            } else if self.unload(&dir).await {
                debug!(module = %dir.display(), "entry file removed, unloaded");
            }
        }
    }

    /// Maps a changed file to its module directory: the nearest ancestor
    /// (within a watched root) carrying the entry file, or the parent of a
    /// removed entry file.
    fn module_dir_for(&self, path: &Path) -> Option<PathBuf> {
        let mut dir = path.parent()?;
        if path.file_name().is_some_and(|name| name == ENTRY_FILE)
            && self.loaded.lock().contains_key(dir)
        {
            return Some(dir.to_path_buf());
        }
        loop {
            if !self.dirs.iter().any(|root| dir.starts_with(root)) {
                return None;
            }
            if dir.join(ENTRY_FILE).is_file() {
                return Some(dir.to_path_buf());
            }
            dir = dir.parent()?;
        }
    }
}

/// Compiles one instance's declarations into registry entries. Cron
/// declarations produce no entry; they are scheduled separately.
fn compile_entries(
    record: &Arc<InstanceRecord>,
    dir: &Path,
) -> Result<Vec<Arc<HandlerEntry>>, LoadError> {
    let manifest = &record.manifest;
    let mut entries = Vec::new();
    for decl in record.plugin.handlers() {
        let (kind, target) = match &decl.kind {
            HandlerKind::Command { pattern, event } => {
                let regex = Regex::new(pattern).map_err(|source| LoadError::Pattern {
                    plugin: manifest.name.clone(),
                    method: decl.method.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
                let target = event.clone().unwrap_or_else(|| manifest.event.clone());
                (CompiledKind::Command { regex }, target)
            }
            HandlerKind::Event { target } => (CompiledKind::Event, target.clone()),
            HandlerKind::Cron { .. } => continue,
        };

        let root = target.split('.').next().unwrap_or(&target);
        if target != "all" && PostType::from_str(root).is_err() {
            return Err(LoadError::Target {
                plugin: manifest.name.clone(),
                method: decl.method.clone(),
                target,
            });
        }

        entries.push(Arc::new(HandlerEntry {
            owner: Arc::clone(record),
            method: decl.method.clone(),
            kind,
            target,
            priority: decl.priority.unwrap_or(manifest.priority),
            permission: decl.permission.or(manifest.permission),
            cost: decl.cost,
            path: dir.to_path_buf(),
        }));
    }
    Ok(entries)
}

async fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut subdirs = Vec::new();
    let Ok(mut read) = tokio::fs::read_dir(dir).await else {
        warn!(dir = %dir.display(), "plugin directory is not readable");
        return subdirs;
    };
    while let Ok(Some(entry)) = read.next_entry().await {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    subdirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::HandlerDecl;
    use crate::plugin::{Flow, HandlerContext, HandlerResult, Plugin, PluginManifest};
    use crate::scheduler::CronScheduler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Probe {
        name: &'static str,
        fail_init: bool,
    }

    #[async_trait]
    impl Plugin for Probe {
        fn manifest(&self) -> PluginManifest {
            PluginManifest::new(self.name)
        }

        fn handlers(&self) -> Vec<HandlerDecl> {
            vec![HandlerDecl::command("ping", "^ping$")]
        }

        async fn init(&self) -> Result<(), crate::error::BoxError> {
            if self.fail_init {
                return Err("init refused".into());
            }
            Ok(())
        }

        async fn call(&self, _method: &str, _ctx: &HandlerContext) -> HandlerResult {
            Ok(Flow::Handled)
        }
    }

    fn probe_factory() -> Vec<Box<dyn Plugin>> {
        vec![Box::new(Probe {
            name: "probe",
            fail_init: false,
        })]
    }

    fn failing_factory() -> Vec<Box<dyn Plugin>> {
        vec![Box::new(Probe {
            name: "failing",
            fail_init: true,
        })]
    }

    fn loader_in(root: &Path) -> Arc<ModuleLoader> {
        ModuleLoader::new(
            Arc::new(HandlerRegistry::new()),
            ContextStore::new(),
            Arc::new(CronScheduler::new()),
            vec![root.to_path_buf()],
        )
    }

    async fn write_module(root: &Path, name: &str, body: &str) -> PathBuf {
        let dir = root.join(name);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(ENTRY_FILE), body).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn load_all_finds_modules_and_apps() {
        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("parent", probe_factory);
        loader.register_factory("child", probe_factory);
        loader.register_factory("nested", probe_factory);

        let parent = write_module(tmp.path(), "parent", "").await;
        write_module(&parent.join("apps"), "child", "").await;
        // A directory without an entry file is descended, not loaded.
        write_module(&tmp.path().join("grouping"), "nested", "").await;

        assert_eq!(loader.load_all().await, 3);
        assert_eq!(loader.registry.len(), 3);
    }

    #[tokio::test]
    async fn manifest_can_override_factory_name() {
        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("custom", probe_factory);

        let dir = write_module(tmp.path(), "whatever", r#"module = "custom""#).await;
        assert_eq!(loader.load(&dir).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_factory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        let dir = write_module(tmp.path(), "ghost", "").await;
        assert!(matches!(
            loader.load(&dir).await,
            Err(LoadError::UnknownModule(name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn failed_init_keeps_previous_generation() {
        static SWAPPED: AtomicBool = AtomicBool::new(false);

        fn switching_factory() -> Vec<Box<dyn Plugin>> {
            if SWAPPED.load(Ordering::SeqCst) {
                failing_factory()
            } else {
                probe_factory()
            }
        }

        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("mod", switching_factory);

        let dir = write_module(tmp.path(), "mod", "").await;
        loader.load(&dir).await.unwrap();
        let old_id = loader.registry.snapshot().all[0].owner.id;

        SWAPPED.store(true, Ordering::SeqCst);
        assert!(matches!(
            loader.load(&dir).await,
            Err(LoadError::Init { .. })
        ));

        // The first generation is still published.
        let snapshot = loader.registry.snapshot();
        assert_eq!(snapshot.all.len(), 1);
        assert_eq!(snapshot.all[0].owner.id, old_id);
    }

    #[tokio::test]
    async fn reload_swaps_generation_in_place() {
        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("mod", probe_factory);

        let dir = write_module(tmp.path(), "mod", "").await;
        loader.load(&dir).await.unwrap();
        let first = loader.registry.snapshot().all[0].owner.id;

        loader.load(&dir).await.unwrap();
        let snapshot = loader.registry.snapshot();
        assert_eq!(snapshot.all.len(), 1);
        assert_ne!(snapshot.all[0].owner.id, first);
    }

    #[tokio::test]
    async fn unload_clears_registry_and_contexts() {
        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("mod", probe_factory);

        let dir = write_module(tmp.path(), "mod", "").await;
        loader.load(&dir).await.unwrap();
        let owner = Arc::clone(&loader.registry.snapshot().all[0].owner);
        loader.contexts.set(
            "2000".into(),
            Arc::clone(&owner),
            "step".into(),
            Duration::from_secs(60),
            None,
            true,
        );

        assert!(loader.unload(&dir).await);
        assert_eq!(loader.registry.len(), 0);
        assert!(loader.contexts.resolve(&["2000".into()]).is_none());
        assert!(!loader.unload(&dir).await);
    }

    #[tokio::test]
    async fn bad_pattern_fails_the_whole_module() {
        struct BadPattern;

        #[async_trait]
        impl Plugin for BadPattern {
            fn manifest(&self) -> PluginManifest {
                PluginManifest::new("bad")
            }
            fn handlers(&self) -> Vec<HandlerDecl> {
                vec![
                    HandlerDecl::command("ok", "^fine$"),
                    HandlerDecl::command("broken", "(unclosed"),
                ]
            }
            async fn call(&self, _method: &str, _ctx: &HandlerContext) -> HandlerResult {
                Ok(Flow::Continue)
            }
        }

        fn bad_factory() -> Vec<Box<dyn Plugin>> {
            vec![Box::new(BadPattern)]
        }

        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("bad", bad_factory);

        let dir = write_module(tmp.path(), "bad", "").await;
        assert!(matches!(
            loader.load(&dir).await,
            Err(LoadError::Pattern { .. })
        ));
        assert_eq!(loader.registry.len(), 0);
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cron_fire_is_logged_when_enabled() {
        struct Beat;

        #[async_trait]
        impl Plugin for Beat {
            fn manifest(&self) -> PluginManifest {
                PluginManifest::new("beat")
            }
            fn handlers(&self) -> Vec<HandlerDecl> {
                vec![HandlerDecl::cron("tick", "* * * * * *")]
            }
            async fn call(&self, _method: &str, _ctx: &HandlerContext) -> HandlerResult {
                Ok(Flow::Continue)
            }
        }

        fn beat_factory() -> Vec<Box<dyn Plugin>> {
            vec![Box::new(Beat)]
        }

        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("beat", beat_factory);
        let dir = write_module(tmp.path(), "beat", "").await;
        loader.load(&dir).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let logs = capture.contents();
        assert!(logs.contains("scheduled job fired"));
        assert!(logs.contains("tick"));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_coalesces_bursts() {
        static LOADS: AtomicU32 = AtomicU32::new(0);

        fn counting_factory() -> Vec<Box<dyn Plugin>> {
            LOADS.fetch_add(1, Ordering::SeqCst);
            probe_factory()
        }

        let tmp = TempDir::new().unwrap();
        let loader = loader_in(tmp.path());
        loader.register_factory("burst", counting_factory);
        let dir = write_module(tmp.path(), "burst", "").await;

        let (tx, rx) = mpsc::channel(16);
        let watcher = tokio::spawn(Arc::clone(&loader).watch(rx));

        let entry = dir.join(ENTRY_FILE);
        for _ in 0..3 {
            tx.send(FileChange {
                kind: ChangeKind::Modify,
                path: entry.clone(),
            })
            .await
            .unwrap();
        }
        // Non-toml changes are ignored.
        tx.send(FileChange {
            kind: ChangeKind::Modify,
            path: dir.join("notes.txt"),
        })
        .await
        .unwrap();
        drop(tx);
        watcher.await.unwrap();

        assert_eq!(LOADS.load(Ordering::SeqCst), 1);
        assert_eq!(loader.registry.len(), 1);
    }
}
