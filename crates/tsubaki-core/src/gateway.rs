//! Gateway endpoint interface.
//!
//! The gateway collaborator owns the wire protocol; the core only calls back
//! into it through [`Endpoint`] action methods, which are pure pass-through
//! delegations. Endpoints are registered per `self_id` so the dispatcher can
//! resolve the endpoint an event arrived on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::segment::Segment;

/// Result type for gateway action calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error type for gateway action calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No endpoint is connected for the event's `self_id`.
    #[error("endpoint is not connected")]
    NotConnected,
    /// The gateway rejected the action.
    #[error("gateway error ({retcode}): {message}")]
    Gateway { retcode: i32, message: String },
    /// The action call timed out.
    #[error("action call timed out")]
    Timeout,
    /// Other gateway failure.
    #[error("{0}")]
    Other(String),
}

/// One connected gateway endpoint (one bot account).
///
/// All methods are outbound actions; none of them feed events back into the
/// core. Implementations live in the gateway collaborator.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Id of the account this endpoint serves (matches `Event::self_id`).
    fn self_id(&self) -> i64;

    /// Sends a group message; returns the sent message id.
    async fn send_group_msg(&self, group_id: i64, message: Vec<Segment>) -> ApiResult<i64>;

    /// Sends a private message; returns the sent message id.
    async fn send_private_msg(&self, user_id: i64, message: Vec<Segment>) -> ApiResult<i64>;

    /// Recalls a previously sent message.
    async fn delete_msg(&self, message_id: i64) -> ApiResult<()>;

    /// Removes a member from a group.
    async fn set_group_kick(&self, group_id: i64, user_id: i64, reject_add: bool) -> ApiResult<()>;

    /// Mutes a member for `duration_secs` seconds (0 lifts the mute).
    async fn set_group_ban(&self, group_id: i64, user_id: i64, duration_secs: u64)
    -> ApiResult<()>;

    /// Approves or rejects a friend/group request identified by `flag`.
    async fn set_request(
        &self,
        flag: &str,
        sub_type: Option<&str>,
        approve: bool,
        reason: &str,
    ) -> ApiResult<()>;
}

/// A shared endpoint trait object.
pub type BoxedEndpoint = Arc<dyn Endpoint>;

/// Registry of connected endpoints, keyed by `self_id`.
///
/// The gateway collaborator registers endpoints as connections come and go;
/// the dispatcher only resolves.
#[derive(Default)]
pub struct Endpoints {
    map: RwLock<HashMap<i64, BoxedEndpoint>>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint, replacing any previous one with the same id.
    pub fn register(&self, endpoint: BoxedEndpoint) {
        let id = endpoint.self_id();
        self.map.write().insert(id, endpoint);
        debug!(self_id = id, "endpoint registered");
    }

    /// Removes the endpoint with the given id.
    pub fn unregister(&self, self_id: i64) {
        if self.map.write().remove(&self_id).is_some() {
            debug!(self_id, "endpoint unregistered");
        }
    }

    /// Resolves the endpoint for `self_id`.
    pub fn resolve(&self, self_id: i64) -> Option<BoxedEndpoint> {
        self.map.read().get(&self_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
