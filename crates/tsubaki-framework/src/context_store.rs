//! Conversational context bindings.
//!
//! A handler can bind its conversation scope to one of its methods; the next
//! event from the same scope then bypasses the dispatch walk and goes
//! straight to the bound method. Bindings expire on a timer and are keyed by
//! scope (`group:user` or `user`), so one conversation holds at most one
//! binding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::InstanceRecord;

struct ContextEntry {
    owner: Arc<InstanceRecord>,
    method: String,
    data: Option<Value>,
    timer: Option<JoinHandle<()>>,
}

/// A resolved context binding.
pub struct ContextHit {
    pub owner: Arc<InstanceRecord>,
    pub method: String,
    pub data: Option<Value>,
}

/// All live context bindings, keyed by conversation scope.
#[derive(Default)]
pub struct ContextStore {
    entries: Mutex<HashMap<String, ContextEntry>>,
}

impl ContextStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Binds `key` to `owner`/`method` for `ttl`. A zero `ttl` starts no
    /// timer; the binding lives until finished or superseded.
    ///
    /// Re-binding the identical owner and method with `refresh_timer` false
    /// keeps the running expiry timer and only replaces `data`. Any other
    /// re-binding replaces the entry and restarts the timer.
    pub fn set(
        self: &Arc<Self>,
        key: String,
        owner: Arc<InstanceRecord>,
        method: String,
        ttl: Duration,
        data: Option<Value>,
        refresh_timer: bool,
    ) {
        let mut entries = self.entries.lock();
        if !refresh_timer
            && let Some(entry) = entries.get_mut(&key)
            && entry.owner.id == owner.id
            && entry.method == method
        {
            entry.data = data;
            return;
        }

        if let Some(old) = entries.remove(&key)
            && let Some(timer) = old.timer
        {
            timer.abort();
        }

        let timer = if ttl.is_zero() {
            None
        } else {
            let store = Arc::clone(self);
            let key = key.clone();
            let owner_id = owner.id;
            let method = method.clone();
            Some(tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                store.expire(&key, owner_id, &method);
            }))
        };
        debug!(key = %key, owner = owner.name(), method = %method, "context bound");
        entries.insert(
            key,
            ContextEntry {
                owner,
                method,
                data,
                timer,
            },
        );
    }

    /// Removes the binding at `key` only if it still belongs to the given
    /// owner generation and method. A timer that outlived a rebind is a
    /// no-op here.
    fn expire(&self, key: &str, owner_id: u64, method: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key)
            && entry.owner.id == owner_id
            && entry.method == method
        {
            debug!(key, method, "context expired");
            entries.remove(key);
        }
    }

    /// Resolves the first bound scope key, most specific first.
    pub fn resolve(&self, keys: &[String]) -> Option<ContextHit> {
        let entries = self.entries.lock();
        keys.iter().find_map(|key| {
            entries.get(key).map(|entry| ContextHit {
                owner: Arc::clone(&entry.owner),
                method: entry.method.clone(),
                data: entry.data.clone(),
            })
        })
    }

    /// Clears the binding at `key` when it points at `method`.
    pub fn finish(&self, key: &str, method: &str) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.method == method)
            && let Some(entry) = entries.remove(key)
            && let Some(timer) = entry.timer
        {
            timer.abort();
        }
    }

    /// Drops every binding owned by the instance `id`. Called on unload.
    pub fn remove_instance(&self, id: u64) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| {
            if entry.owner.id == id {
                if let Some(timer) = &entry.timer {
                    timer.abort();
                }
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
