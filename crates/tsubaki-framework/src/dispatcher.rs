//! Event dispatch pipeline.
//!
//! One inbound event flows through: prefilter, endpoint resolution, context
//! bypass, then the priority-ordered handler walk. A handler returning
//! [`Flow::Continue`] passes the event on; anything else consumes it. A
//! handler error is logged and isolated; the walk moves to the next
//! candidate.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tsubaki_core::economy::BoxedEconomy;
use tsubaki_core::event::{Event, PostType};
use tsubaki_core::gateway::{BoxedEndpoint, Endpoints};
use tsubaki_core::settings::{BoxedConfigStore, Settings};

use crate::context_store::{ContextHit, ContextStore};
use crate::gates;
use crate::plugin::{Flow, HandlerContext};
use crate::registry::{CompiledKind, HandlerRegistry};

/// Routes events to handlers.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    contexts: Arc<ContextStore>,
    endpoints: Arc<Endpoints>,
    config: BoxedConfigStore,
    economy: BoxedEconomy,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        contexts: Arc<ContextStore>,
        endpoints: Arc<Endpoints>,
        config: BoxedConfigStore,
        economy: BoxedEconomy,
    ) -> Self {
        Self {
            registry,
            contexts,
            endpoints,
            config,
            economy,
        }
    }

    /// Dispatches one event to completion.
    pub async fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        let settings = self.config.settings();

        if !self.prefilter(&event, &settings) {
            return;
        }

        let endpoint = self.endpoints.resolve(event.self_id);
        if endpoint.is_none() {
            warn!(self_id = event.self_id, "no endpoint for event, replies will fail");
        }

        if let Some(hit) = self.contexts.resolve(&event.scope_keys()) {
            self.dispatch_context(&event, endpoint, hit).await;
            return;
        }

        self.walk(&event, endpoint, &settings).await;
    }

    /// Access-control prefilter. Meta events (heartbeats, lifecycle) are
    /// exempt. Returns `false` to drop the event.
    fn prefilter(&self, event: &Event, settings: &Settings) -> bool {
        if event.post_type == PostType::MetaEvent {
            return true;
        }

        if let Some(user_id) = event.user_id {
            if settings.black_users.contains(&user_id) {
                debug!(user_id, "dropped event from blacklisted user");
                return false;
            }
            if event.is_private() && settings.block_private && !settings.is_master(user_id) {
                debug!(user_id, "dropped private message, block_private is on");
                return false;
            }
        }

        if let Some(group_id) = event.group_id {
            if !settings.white_groups.is_empty() {
                if !settings.white_groups.contains(&group_id) {
                    debug!(group_id, "dropped event from non-whitelisted group");
                    return false;
                }
            } else if settings.black_groups.contains(&group_id) {
                debug!(group_id, "dropped event from blacklisted group");
                return false;
            }
        }

        true
    }

    /// Context bypass: the bound method is invoked directly, once, and the
    /// event is consumed regardless of its return.
    async fn dispatch_context(
        &self,
        event: &Arc<Event>,
        endpoint: Option<BoxedEndpoint>,
        hit: ContextHit,
    ) {
        let owner = Arc::clone(&hit.owner);
        let ctx = HandlerContext::new(
            Arc::clone(event),
            endpoint,
            Arc::clone(&self.contexts),
            Arc::clone(&self.config),
            Arc::clone(&owner),
        );
        debug!(plugin = owner.name(), method = %hit.method, "context bypass");
        if let Err(err) = owner.plugin.call(&hit.method, &ctx).await {
            error!(
                plugin = owner.name(),
                method = %hit.method,
                error = %err,
                "context handler failed"
            );
            if owner.manifest.context_policy.clear_on_error {
                for key in event.scope_keys() {
                    self.contexts.finish(&key, &hit.method);
                }
            }
        }
    }

    /// The general walk over the published snapshot for this event root.
    async fn walk(
        &self,
        event: &Arc<Event>,
        endpoint: Option<BoxedEndpoint>,
        settings: &Settings,
    ) {
        let snapshot = self.registry.snapshot();
        let descriptor = event.descriptor();
        let text = event.plain_text();

        for entry in snapshot.for_root(event.post_type) {
            if !gates::permission_allows(entry.permission, event, settings) {
                continue;
            }
            if !gates::event_type_matches(&entry.target, &descriptor) {
                continue;
            }
            let Some(captures) = gates::pattern_matches(entry, &text) else {
                continue;
            };
            if !gates::cost_allows(entry.cost, event, settings, self.economy.as_ref()) {
                debug!(
                    plugin = entry.owner.name(),
                    method = %entry.method,
                    "insufficient balance for handler cost"
                );
                continue;
            }

            let ctx = HandlerContext::new(
                Arc::clone(event),
                endpoint.clone(),
                Arc::clone(&self.contexts),
                Arc::clone(&self.config),
                Arc::clone(&entry.owner),
            );
            if matches!(entry.kind, CompiledKind::Command { .. }) {
                ctx.set_captures(captures);
            }

            if entry.owner.manifest.log {
                info!(
                    plugin = entry.owner.name(),
                    method = %entry.method,
                    user_id = event.user_id,
                    group_id = event.group_id,
                    "handler triggered"
                );
            }

            match entry.owner.plugin.call(&entry.method, &ctx).await {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Handled) => return,
                Err(err) => {
                    error!(
                        plugin = entry.owner.name(),
                        method = %entry.method,
                        error = %err,
                        "handler failed, continuing walk"
                    );
                    continue;
                }
            }
        }
    }
}
