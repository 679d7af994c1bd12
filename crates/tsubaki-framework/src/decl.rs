//! Handler declarations.
//!
//! A plugin publishes a list of [`HandlerDecl`]s describing what each of its
//! methods reacts to. Declarations are plain data; patterns and cron
//! expressions are validated and compiled once at load time.

use serde::Deserialize;

/// What a handler reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// Matches message text against a regular expression.
    Command {
        pattern: String,
        /// Narrower event target than the plugin default, e.g.
        /// `message.group`.
        event: Option<String>,
    },
    /// Reacts to every event whose type matches `target`.
    Event { target: String },
    /// Runs on a cron schedule, not tied to any event.
    Cron { expr: String },
}

/// Minimum privilege required to trigger a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Only the master account.
    Master,
    /// The master and whitelisted users.
    White,
}

/// One handler method declared by a plugin.
#[derive(Debug, Clone)]
pub struct HandlerDecl {
    /// Method name the dispatcher routes through `Plugin::call`.
    pub method: String,
    pub kind: HandlerKind,
    /// Overrides the plugin-level priority when set.
    pub priority: Option<i32>,
    pub permission: Option<Permission>,
    /// Invocation cost deducted from the sender's balance.
    pub cost: Option<u64>,
}

impl HandlerDecl {
    /// A command handler matching `pattern` against message text.
    pub fn command(method: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kind: HandlerKind::Command {
                pattern: pattern.into(),
                event: None,
            },
            priority: None,
            permission: None,
            cost: None,
        }
    }

    /// An event handler for every event under `target`.
    pub fn event(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kind: HandlerKind::Event {
                target: target.into(),
            },
            priority: None,
            permission: None,
            cost: None,
        }
    }

    /// A scheduled job firing on the cron expression `expr`.
    pub fn cron(method: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kind: HandlerKind::Cron { expr: expr.into() },
            priority: None,
            permission: None,
            cost: None,
        }
    }

    /// Narrows a command handler to a specific event target.
    pub fn on(mut self, target: impl Into<String>) -> Self {
        if let HandlerKind::Command { event, .. } = &mut self.kind {
            *event = Some(target.into());
        }
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn cost(mut self, cost: u64) -> Self {
        self.cost = Some(cost);
        self
    }
}
