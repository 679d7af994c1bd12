//! Filesystem watcher for plugin directories.
//!
//! Bridges `notify` events into the loader's [`FileChange`] channel. The
//! loader does its own short coalescing on top, so the debounce here only
//! smooths editor write bursts.

use std::path::PathBuf;
use std::time::Duration;

use notify_debouncer_full::notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tsubaki_framework::loader::{ChangeKind, FileChange};

use crate::error::RuntimeError;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches plugin directories and feeds changes to the module loader.
///
/// Dropping the watcher stops the notifications.
pub struct PluginWatcher {
    _debouncer: Debouncer<notify_debouncer_full::notify::RecommendedWatcher, RecommendedCache>,
}

impl PluginWatcher {
    /// Starts watching `dirs` recursively. Returns the watcher and the
    /// change receiver to hand to the loader.
    pub fn start(dirs: &[PathBuf]) -> Result<(Self, mpsc::Receiver<FileChange>), RuntimeError> {
        let (tx, rx) = mpsc::channel(64);

        let debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        let kind = match event.kind {
                            EventKind::Create(_) => ChangeKind::Create,
                            EventKind::Modify(_) => ChangeKind::Modify,
                            EventKind::Remove(_) => ChangeKind::Remove,
                            _ => continue,
                        };
                        for path in &event.paths {
                            debug!(path = %path.display(), ?kind, "plugin file changed");
                            if tx
                                .blocking_send(FileChange {
                                    kind,
                                    path: path.clone(),
                                })
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for err in errors {
                        warn!(error = %err, "plugin watcher error");
                    }
                }
            }
        })
        .map_err(|err| RuntimeError::Watcher(err.to_string()))?;

        let mut watcher = Self {
            _debouncer: debouncer,
        };
        for dir in dirs {
            if dir.is_dir() {
                watcher
                    ._debouncer
                    .watch(dir, RecursiveMode::Recursive)
                    .map_err(|err| RuntimeError::Watcher(err.to_string()))?;
                info!(dir = %dir.display(), "watching plugin directory");
            } else {
                warn!(dir = %dir.display(), "plugin directory missing, not watched");
            }
        }

        Ok((watcher, rx))
    }
}
