//! Dispatch gates.
//!
//! Every candidate handler passes an ordered chain of checks before its
//! method is invoked: permission, event type, pattern, cost. The chain
//! short-circuits at the first failing gate; only the cost gate has a side
//! effect (the deduction).

use tsubaki_core::economy::Economy;
use tsubaki_core::event::Event;
use tsubaki_core::settings::Settings;

use crate::decl::Permission;
use crate::registry::{CompiledKind, HandlerEntry};

/// Permission gate. An absent requirement admits everyone.
pub(crate) fn permission_allows(
    permission: Option<Permission>,
    event: &Event,
    settings: &Settings,
) -> bool {
    let Some(permission) = permission else {
        return true;
    };
    let Some(user_id) = event.user_id else {
        return false;
    };
    match permission {
        Permission::Master => settings.is_master(user_id),
        Permission::White => settings.is_white(user_id),
    }
}

/// Event type gate. The handler target must cover the event's descriptor:
/// `all` covers everything, otherwise the target must be a string prefix of
/// the descriptor.
pub(crate) fn event_type_matches(target: &str, descriptor: &str) -> bool {
    target == "all" || descriptor.starts_with(target)
}

/// Pattern gate. Only command handlers carry a pattern; a match returns the
/// capture groups (group 0 is the whole match).
pub(crate) fn pattern_matches(entry: &HandlerEntry, text: &str) -> Option<Vec<Option<String>>> {
    match &entry.kind {
        CompiledKind::Command { regex } => regex.captures(text).map(|captures| {
            (0..captures.len())
                .map(|i| captures.get(i).map(|m| m.as_str().to_string()))
                .collect()
        }),
        CompiledKind::Event => Some(Vec::new()),
    }
}

/// Cost gate. Deducts the declared cost from the sender's balance; the
/// master is exempt. Returns `false` without invoking the handler when the
/// balance is insufficient.
pub(crate) fn cost_allows(
    cost: Option<u64>,
    event: &Event,
    settings: &Settings,
    economy: &dyn Economy,
) -> bool {
    let Some(cost) = cost else {
        return true;
    };
    if cost == 0 {
        return true;
    }
    let Some(user_id) = event.user_id else {
        return false;
    };
    if settings.is_master(user_id) {
        return true;
    }
    economy.deduct(user_id, event.group_id, cost)
}
