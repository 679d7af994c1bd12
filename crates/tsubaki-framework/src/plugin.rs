//! The plugin capability trait and the per-invocation handler context.
//!
//! A plugin is a named bundle of handlers. Its [`Plugin::call`] method routes
//! a method name to the matching handler; the [`route_methods!`] macro
//! generates that routing table. Each invocation receives a fresh
//! [`HandlerContext`] carrying the event and the collaborator handles, so
//! concurrent dispatches never share mutable state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tsubaki_core::event::Event;
use tsubaki_core::gateway::{ApiError, ApiResult, BoxedEndpoint};
use tsubaki_core::segment::Segment;
use tsubaki_core::settings::BoxedConfigStore;

use crate::context_store::ContextStore;
use crate::decl::{HandlerDecl, Permission};
use crate::error::BoxError;
use crate::registry::InstanceRecord;

/// Default time a conversational context stays resolvable.
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(120);

/// Continuation decision returned by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The event is consumed; the dispatch walk stops.
    Handled,
    /// The event was not (fully) handled; the walk continues.
    Continue,
}

/// Result of one handler invocation.
pub type HandlerResult = Result<Flow, BoxError>;

/// Conversation scope a context binding attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextScope {
    /// The most specific scope of the event: `group:user` in a group,
    /// `user` in private.
    Conversation,
    /// The sending user alone, even inside a group.
    User,
    /// An explicit scope key.
    Key(String),
}

/// Policy for conversational contexts owned by a plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextPolicy {
    /// Clears the binding when the bound handler returns an error.
    /// Off by default so a transient failure keeps the conversation alive.
    pub clear_on_error: bool,
}

/// Static description of a plugin.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub name: String,
    /// Default event target for the plugin's command handlers.
    pub event: String,
    /// Default dispatch priority; lower runs earlier.
    pub priority: i32,
    /// Plugin-level permission applied to handlers without their own.
    pub permission: Option<Permission>,
    /// Emits an info line for each handled invocation.
    pub log: bool,
    pub context_policy: ContextPolicy,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event: "message".to_string(),
            priority: 5000,
            permission: None,
            log: true,
            context_policy: ContextPolicy::default(),
        }
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn context_policy(mut self, policy: ContextPolicy) -> Self {
        self.context_policy = policy;
        self
    }
}

/// A bundle of handlers registered as one unit.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> PluginManifest;

    /// Handler declarations, validated once at load time.
    fn handlers(&self) -> Vec<HandlerDecl>;

    /// Called once after instantiation, before any handler runs.
    async fn init(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called once when the plugin is unloaded or replaced.
    async fn destroy(&self) {}

    /// Routes a declared method name to its handler.
    async fn call(&self, method: &str, ctx: &HandlerContext) -> HandlerResult;

    /// Runs a scheduled job method. Only called for cron declarations.
    async fn run_job(&self, method: &str) -> Result<(), BoxError> {
        let _ = method;
        Ok(())
    }
}

/// Expands to the [`Plugin::call`] routing match from `"name" => method`
/// pairs. Used inside the `call` body:
///
/// ```rust,ignore
/// async fn call(&self, method: &str, ctx: &HandlerContext) -> HandlerResult {
///     route_methods!(self, method, ctx, {
///         "hello" => hello,
///         "bye" => bye,
///     })
/// }
/// ```
///
/// Unknown names fall through to
/// [`PluginError::UnknownMethod`](crate::error::PluginError::UnknownMethod).
#[macro_export]
macro_rules! route_methods {
    ($self:ident, $method:ident, $ctx:ident, { $($name:literal => $handler:ident),+ $(,)? }) => {
        match $method {
            $($name => $self.$handler($ctx).await,)+
            other => Err($crate::error::PluginError::UnknownMethod(other.to_string()).into()),
        }
    };
}

/// Per-invocation carrier handed to every handler call.
///
/// Owns the event, the resolved gateway endpoint, and handles to the
/// context store and configuration. Pattern captures from the matching
/// command handler are filled in just before the call.
pub struct HandlerContext {
    event: Arc<Event>,
    endpoint: Option<BoxedEndpoint>,
    contexts: Arc<ContextStore>,
    config: BoxedConfigStore,
    owner: Arc<InstanceRecord>,
    captures: Mutex<Vec<Option<String>>>,
}

impl HandlerContext {
    pub(crate) fn new(
        event: Arc<Event>,
        endpoint: Option<BoxedEndpoint>,
        contexts: Arc<ContextStore>,
        config: BoxedConfigStore,
        owner: Arc<InstanceRecord>,
    ) -> Self {
        Self {
            event,
            endpoint,
            contexts,
            config,
            owner,
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The gateway endpoint the event arrived on, when still connected.
    pub fn endpoint(&self) -> Option<&BoxedEndpoint> {
        self.endpoint.as_ref()
    }

    pub(crate) fn set_captures(&self, captures: Vec<Option<String>>) {
        *self.captures.lock() = captures;
    }

    /// Capture group `index` from the matched command pattern.
    /// Group 0 is the whole match.
    pub fn capture(&self, index: usize) -> Option<String> {
        self.captures.lock().get(index).cloned().flatten()
    }

    pub fn is_master(&self) -> bool {
        self.event
            .user_id
            .is_some_and(|id| self.config.settings().is_master(id))
    }

    pub fn is_white(&self) -> bool {
        self.event
            .user_id
            .is_some_and(|id| self.config.settings().is_white(id))
    }

    /// Sends `message` back to the conversation the event came from.
    pub async fn reply(&self, message: Vec<Segment>) -> ApiResult<i64> {
        let endpoint = self.endpoint.as_ref().ok_or(ApiError::NotConnected)?;
        if let Some(group_id) = self.event.group_id {
            endpoint.send_group_msg(group_id, message).await
        } else if let Some(user_id) = self.event.user_id {
            endpoint.send_private_msg(user_id, message).await
        } else {
            Err(ApiError::Other("event has no reply target".to_string()))
        }
    }

    /// Sends plain text back to the conversation.
    pub async fn reply_text(&self, text: impl Into<String>) -> ApiResult<i64> {
        self.reply(vec![Segment::text(text)]).await
    }

    /// Recalls a previously sent message.
    pub async fn recall(&self, message_id: i64) -> ApiResult<()> {
        let endpoint = self.endpoint.as_ref().ok_or(ApiError::NotConnected)?;
        endpoint.delete_msg(message_id).await
    }

    fn scope_key(&self, scope: &ContextScope) -> Option<String> {
        match scope {
            ContextScope::Conversation => self.event.scope_keys().into_iter().next(),
            ContextScope::User => self.event.user_id.map(|id| id.to_string()),
            ContextScope::Key(key) => Some(key.clone()),
        }
    }

    /// Binds `scope` to `method` of this plugin.
    ///
    /// The next event in that scope bypasses the dispatch walk and goes
    /// straight to the bound method. A `ttl` of `None` uses
    /// [`DEFAULT_CONTEXT_TTL`]; `Some(Duration::ZERO)` never expires.
    /// Re-binding the same method with `refresh_timer` false keeps the
    /// original expiry and only swaps `data`.
    pub fn set_context(
        &self,
        method: impl Into<String>,
        scope: ContextScope,
        ttl: Option<Duration>,
        data: Option<Value>,
        refresh_timer: bool,
    ) {
        if let Some(key) = self.scope_key(&scope) {
            self.contexts.set(
                key,
                Arc::clone(&self.owner),
                method.into(),
                ttl.unwrap_or(DEFAULT_CONTEXT_TTL),
                data,
                refresh_timer,
            );
        }
    }

    /// Clears the binding at `scope`, if it points at `method`.
    pub fn finish(&self, method: &str, scope: ContextScope) {
        if let Some(key) = self.scope_key(&scope) {
            self.contexts.finish(&key, method);
        }
    }

    /// Data stored by the binding at `scope`, only when that binding points
    /// at `method`.
    pub fn get_context(&self, method: &str, scope: ContextScope) -> Option<Value> {
        let key = self.scope_key(&scope)?;
        self.contexts
            .resolve(std::slice::from_ref(&key))
            .filter(|hit| hit.method == method)
            .and_then(|hit| hit.data)
    }

    /// Data stored by the active context binding for this conversation,
    /// whichever method it points at.
    pub fn context_data(&self) -> Option<Value> {
        self.contexts
            .resolve(&self.event.scope_keys())
            .and_then(|hit| hit.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::HandlerDecl;
    use crate::error::PluginError;
    use parking_lot::Mutex as PlMutex;
    use tsubaki_core::gateway::Endpoint;
    use tsubaki_core::settings::{MemoryConfig, Settings};

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn manifest(&self) -> PluginManifest {
            PluginManifest::new("echo")
        }

        fn handlers(&self) -> Vec<HandlerDecl> {
            vec![HandlerDecl::command("echo", "^echo (.+)$")]
        }

        async fn call(&self, method: &str, ctx: &HandlerContext) -> HandlerResult {
            route_methods!(self, method, ctx, {
                "echo" => echo,
            })
        }
    }

    impl Echo {
        async fn echo(&self, ctx: &HandlerContext) -> HandlerResult {
            let text = ctx.capture(1).unwrap_or_default();
            ctx.reply_text(text).await?;
            Ok(Flow::Handled)
        }
    }

    #[derive(Default)]
    struct FakeEndpoint {
        sent: PlMutex<Vec<(Option<i64>, Option<i64>, String)>>,
    }

    #[async_trait]
    impl Endpoint for FakeEndpoint {
        fn self_id(&self) -> i64 {
            1
        }

        async fn send_group_msg(
            &self,
            group_id: i64,
            message: Vec<Segment>,
        ) -> ApiResult<i64> {
            let text: String = message.iter().map(ToString::to_string).collect();
            self.sent.lock().push((Some(group_id), None, text));
            Ok(100)
        }

        async fn send_private_msg(
            &self,
            user_id: i64,
            message: Vec<Segment>,
        ) -> ApiResult<i64> {
            let text: String = message.iter().map(ToString::to_string).collect();
            self.sent.lock().push((None, Some(user_id), text));
            Ok(101)
        }

        async fn delete_msg(&self, _message_id: i64) -> ApiResult<()> {
            Ok(())
        }

        async fn set_group_kick(&self, _: i64, _: i64, _: bool) -> ApiResult<()> {
            Ok(())
        }

        async fn set_group_ban(&self, _: i64, _: i64, _: u64) -> ApiResult<()> {
            Ok(())
        }

        async fn set_request(
            &self,
            _: &str,
            _: Option<&str>,
            _: bool,
            _: &str,
        ) -> ApiResult<()> {
            Ok(())
        }
    }

    fn context(event: Event, endpoint: Option<Arc<FakeEndpoint>>) -> HandlerContext {
        let owner = crate::registry::InstanceRecord::new(Arc::new(Echo));
        HandlerContext::new(
            Arc::new(event),
            endpoint.map(|e| e as BoxedEndpoint),
            ContextStore::new(),
            Arc::new(MemoryConfig::new(Settings {
                master: 100,
                ..Default::default()
            })),
            owner,
        )
    }

    fn group_event(user_id: i64) -> Event {
        Event {
            message_type: Some("group".into()),
            self_id: 1,
            user_id: Some(user_id),
            group_id: Some(3000),
            ..Event::default()
        }
    }

    #[tokio::test]
    async fn route_methods_dispatches_and_rejects_unknown() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let ctx = context(group_event(2000), Some(Arc::clone(&endpoint)));
        ctx.set_captures(vec![Some("echo hi".into()), Some("hi".into())]);

        let flow = Echo.call("echo", &ctx).await.unwrap();
        assert_eq!(flow, Flow::Handled);
        assert_eq!(endpoint.sent.lock()[0], (Some(3000), None, "hi".to_string()));

        let err = Echo.call("nope", &ctx).await.unwrap_err();
        assert!(err.downcast_ref::<PluginError>().is_some());
    }

    #[tokio::test]
    async fn reply_routes_private_without_group() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let mut event = group_event(2000);
        event.message_type = Some("private".into());
        event.group_id = None;
        let ctx = context(event, Some(Arc::clone(&endpoint)));

        ctx.reply_text("pong").await.unwrap();
        assert_eq!(endpoint.sent.lock()[0], (None, Some(2000), "pong".to_string()));
    }

    #[tokio::test]
    async fn reply_without_endpoint_is_not_connected() {
        let ctx = context(group_event(2000), None);
        assert!(matches!(
            ctx.reply_text("pong").await,
            Err(ApiError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn master_checks_use_settings() {
        let ctx = context(group_event(100), None);
        assert!(ctx.is_master());
        let ctx = context(group_event(2000), None);
        assert!(!ctx.is_master());
    }

    #[tokio::test(start_paused = true)]
    async fn context_round_trip_through_carrier() {
        let ctx = context(group_event(2000), None);
        ctx.set_context(
            "confirm",
            ContextScope::Conversation,
            Some(Duration::from_secs(30)),
            Some(Value::from("pending")),
            true,
        );
        assert_eq!(ctx.context_data(), Some(Value::from("pending")));
        assert_eq!(
            ctx.get_context("confirm", ContextScope::Conversation),
            Some(Value::from("pending"))
        );
        // A different method name does not see the binding.
        assert_eq!(ctx.get_context("other", ContextScope::Conversation), None);

        ctx.finish("confirm", ContextScope::Conversation);
        assert_eq!(ctx.context_data(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn user_scope_binds_user_key_inside_group() {
        let ctx = context(group_event(2000), None);
        ctx.set_context(
            "survey",
            ContextScope::User,
            None,
            Some(Value::from("q1")),
            true,
        );

        // Bound under the bare user key, not the group:user key.
        assert_eq!(
            ctx.get_context("survey", ContextScope::Key("2000".into())),
            Some(Value::from("q1"))
        );
        assert_eq!(
            ctx.get_context("survey", ContextScope::Key("3000:2000".into())),
            None
        );

        ctx.finish("survey", ContextScope::User);
        assert_eq!(ctx.get_context("survey", ContextScope::User), None);
    }
}
