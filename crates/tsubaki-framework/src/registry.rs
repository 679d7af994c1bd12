//! The handler registry.
//!
//! Loaded plugins contribute [`HandlerEntry`]s to a single master list. The
//! dispatcher never reads that list directly; it reads an immutable
//! [`RegistrySnapshot`] published under an `Arc` swap, so a reload between
//! two events can never expose a half-updated ordering.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tsubaki_core::event::PostType;

use crate::decl::Permission;
use crate::plugin::{Plugin, PluginManifest};
use crate::scheduler::JobHandle;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// One live plugin instance.
///
/// The record identity (not the plugin name) ties handler entries, context
/// bindings and scheduled jobs to a specific load generation, so a stale
/// expiry task can never clear a binding owned by a reloaded instance.
pub struct InstanceRecord {
    pub id: u64,
    pub plugin: Arc<dyn Plugin>,
    pub manifest: PluginManifest,
    /// Scheduled job handles, cancelled when the instance is retired.
    pub jobs: Mutex<Vec<JobHandle>>,
}

impl InstanceRecord {
    pub fn new(plugin: Arc<dyn Plugin>) -> Arc<Self> {
        let manifest = plugin.manifest();
        Arc::new(Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            plugin,
            manifest,
            jobs: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Cancels all scheduled jobs owned by this instance.
    pub fn cancel_jobs(&self) {
        for job in self.jobs.lock().drain(..) {
            job.cancel();
        }
    }
}

/// Match condition of a registered handler, compiled at load time.
pub enum CompiledKind {
    /// Matches message text against the compiled pattern.
    Command { regex: Regex },
    /// Matches on event target alone.
    Event,
}

/// One registered handler.
pub struct HandlerEntry {
    pub owner: Arc<InstanceRecord>,
    pub method: String,
    pub kind: CompiledKind,
    /// Event target this handler attaches to, e.g. `message.group` or `all`.
    pub target: String,
    pub priority: i32,
    pub permission: Option<Permission>,
    pub cost: Option<u64>,
    /// Module path the owning plugin was loaded from.
    pub path: PathBuf,
}

/// Immutable view of the registry at one point in time.
#[derive(Default)]
pub struct RegistrySnapshot {
    /// All entries, priority-sorted (stable by registration order).
    pub all: Vec<Arc<HandlerEntry>>,
    /// Entries indexed by event root. Wildcard entries appear under every
    /// root.
    pub by_root: HashMap<PostType, Vec<Arc<HandlerEntry>>>,
}

impl RegistrySnapshot {
    /// Entries eligible for events under `root`, in dispatch order.
    pub fn for_root(&self, root: PostType) -> &[Arc<HandlerEntry>] {
        self.by_root.get(&root).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Single-writer registry with lock-free snapshot reads.
#[derive(Default)]
pub struct HandlerRegistry {
    master: Mutex<Vec<Arc<HandlerEntry>>>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends entries to the master list. Not visible until [`publish`].
    ///
    /// [`publish`]: HandlerRegistry::publish
    pub fn append(&self, entries: Vec<Arc<HandlerEntry>>) {
        self.master.lock().extend(entries);
    }

    /// Removes every entry contributed by the module at `path`. Not visible
    /// until the next publish.
    pub fn remove_module(&self, path: &Path) -> usize {
        let mut master = self.master.lock();
        let before = master.len();
        master.retain(|entry| entry.path != path);
        before - master.len()
    }

    /// Builds and atomically swaps in a fresh snapshot.
    ///
    /// The sort is stable, so entries with equal priority keep their
    /// registration order across publishes.
    pub fn publish(&self) {
        let mut all = self.master.lock().clone();
        all.sort_by_key(|entry| entry.priority);

        let mut by_root: HashMap<PostType, Vec<Arc<HandlerEntry>>> = HashMap::new();
        for entry in &all {
            if entry.target == "all" {
                for root in PostType::ALL {
                    by_root.entry(root).or_default().push(Arc::clone(entry));
                }
            } else {
                let root = entry.target.split('.').next().unwrap_or(&entry.target);
                if let Ok(root) = PostType::from_str(root) {
                    by_root.entry(root).or_default().push(Arc::clone(entry));
                }
            }
        }

        *self.snapshot.write() = Arc::new(RegistrySnapshot { all, by_root });
    }

    /// The current published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Number of entries in the published snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::HandlerDecl;
    use crate::plugin::HandlerResult;
    use async_trait::async_trait;

    struct Stub(PluginManifest);

    #[async_trait]
    impl Plugin for Stub {
        fn manifest(&self) -> PluginManifest {
            self.0.clone()
        }
        fn handlers(&self) -> Vec<HandlerDecl> {
            Vec::new()
        }
        async fn call(&self, _method: &str, _ctx: &crate::plugin::HandlerContext) -> HandlerResult {
            Ok(crate::plugin::Flow::Continue)
        }
    }

    fn entry(name: &str, method: &str, target: &str, priority: i32) -> Arc<HandlerEntry> {
        let owner = InstanceRecord::new(Arc::new(Stub(PluginManifest::new(name))));
        Arc::new(HandlerEntry {
            owner,
            method: method.to_string(),
            kind: CompiledKind::Event,
            target: target.to_string(),
            priority,
            permission: None,
            cost: None,
            path: PathBuf::from(name),
        })
    }

    #[test]
    fn publish_sorts_stably() {
        let registry = HandlerRegistry::new();
        registry.append(vec![
            entry("a", "m1", "message", 100),
            entry("b", "m2", "message", 50),
            entry("c", "m3", "message", 100),
        ]);
        registry.publish();

        let snapshot = registry.snapshot();
        let methods: Vec<&str> = snapshot.all.iter().map(|e| e.method.as_str()).collect();
        assert_eq!(methods, ["m2", "m1", "m3"]);
    }

    #[test]
    fn wildcard_attaches_to_every_root() {
        let registry = HandlerRegistry::new();
        registry.append(vec![entry("a", "watch", "all", 10)]);
        registry.publish();

        let snapshot = registry.snapshot();
        for root in PostType::ALL {
            assert_eq!(snapshot.for_root(root).len(), 1);
        }
    }

    #[test]
    fn remove_module_drops_only_that_path() {
        let registry = HandlerRegistry::new();
        registry.append(vec![
            entry("a", "m1", "message", 10),
            entry("b", "m2", "message", 10),
        ]);
        registry.publish();
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.remove_module(Path::new("a")), 1);
        // Old snapshot stays intact until publish.
        assert_eq!(registry.len(), 2);
        registry.publish();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().all[0].method, "m2");
    }
}
