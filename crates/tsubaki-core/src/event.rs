//! The normalized event record delivered by the gateway.
//!
//! Every inbound frame is normalized into one [`Event`]: a `post_type` root
//! (message / notice / request / meta_event), a subtype chain, the sender and
//! conversation ids, and the content segments. Events are read-only during
//! dispatch and never persisted.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::segment::Segment;

/// Root classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Message,
    Notice,
    Request,
    MetaEvent,
}

impl PostType {
    /// All root types, in a fixed order. Wildcard handlers attach to each.
    pub const ALL: [PostType; 4] = [
        PostType::Message,
        PostType::Notice,
        PostType::Request,
        PostType::MetaEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Message => "message",
            PostType::Notice => "notice",
            PostType::Request => "request",
            PostType::MetaEvent => "meta_event",
        }
    }
}

impl FromStr for PostType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "message" => PostType::Message,
            "notice" => PostType::Notice,
            "request" => PostType::Request,
            "meta_event" => PostType::MetaEvent,
            _ => return Err(()),
        })
    }
}

impl std::fmt::Display for PostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sender details attached to message events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub nickname: Option<String>,
    /// Group role of the sender: `owner`, `admin`, or `member`.
    #[serde(default)]
    pub role: Option<String>,
}

/// One normalized occurrence from the gateway.
///
/// Subtype fields are populated according to `post_type`; absent fields stay
/// `None`. The full subtype chain is reconstructed by [`Event::descriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub post_type: PostType,
    /// `private` or `group` for message events.
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub notice_type: Option<String>,
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub meta_event_type: Option<String>,
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Unix timestamp of the occurrence.
    #[serde(default)]
    pub time: i64,
    /// Id of the gateway endpoint that received the event.
    pub self_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub message_id: Option<i64>,
    /// Content segments; empty for non-message events.
    #[serde(default)]
    pub message: Vec<Segment>,
    #[serde(default)]
    pub sender: Option<Sender>,
    /// Approval flag carried by request events.
    #[serde(default)]
    pub flag: Option<String>,
    /// Raw frame as received, kept for diagnostics.
    #[serde(skip)]
    pub raw: Option<Arc<str>>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            post_type: PostType::Message,
            message_type: None,
            notice_type: None,
            request_type: None,
            meta_event_type: None,
            sub_type: None,
            time: 0,
            self_id: 0,
            user_id: None,
            group_id: None,
            message_id: None,
            message: Vec::new(),
            sender: None,
            flag: None,
            raw: None,
        }
    }
}

impl Event {
    /// Parses one raw gateway frame.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut event: Event = serde_json::from_str(raw)?;
        event.raw = Some(Arc::from(raw));
        Ok(event)
    }

    /// Builds the full event-type string from the subtype chain.
    ///
    /// Examples: `message.group`, `notice.group_increase.approve`,
    /// `request.friend`, `meta_event.heartbeat`. Handlers declare a target
    /// that must be a string prefix of this value.
    pub fn descriptor(&self) -> String {
        let mut out = self.post_type.as_str().to_string();
        match self.post_type {
            PostType::Message => {
                if let Some(t) = &self.message_type {
                    out.push('.');
                    out.push_str(t);
                }
            }
            PostType::Notice => {
                if let Some(t) = &self.notice_type {
                    out.push('.');
                    out.push_str(t);
                }
                if let Some(s) = &self.sub_type {
                    out.push('.');
                    out.push_str(s);
                }
            }
            PostType::Request => {
                if let Some(t) = &self.request_type {
                    out.push('.');
                    out.push_str(t);
                }
                if let Some(s) = &self.sub_type {
                    out.push('.');
                    out.push_str(s);
                }
            }
            PostType::MetaEvent => {
                if let Some(t) = &self.meta_event_type {
                    out.push('.');
                    out.push_str(t);
                }
            }
        }
        out
    }

    /// Flattens the textual content of the message segments.
    ///
    /// Text segments are concatenated; a single leading space is stripped
    /// from a text segment that immediately follows an @mention, so
    /// `@bot cmd` matches patterns written for `cmd`. The result is trimmed.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.message.iter().enumerate() {
            if let Some(text) = seg.as_text() {
                let text = if i > 0
                    && self.message[i - 1].is_at()
                    && let Some(stripped) = text.strip_prefix(' ')
                {
                    stripped
                } else {
                    text
                };
                out.push_str(text);
            }
        }
        out.trim().to_string()
    }

    /// Returns the first @mentioned user id, or `None` for `@all`.
    pub fn at(&self) -> Option<&str> {
        for seg in &self.message {
            if let Segment::At(data) = seg {
                if data.qq == "all" {
                    return None;
                }
                return Some(&data.qq);
            }
        }
        None
    }

    /// Returns the id of the message this event replies to, if any.
    pub fn reply_id(&self) -> Option<&str> {
        self.message.iter().find_map(|seg| match seg {
            Segment::Reply(data) => Some(data.id.as_str()),
            _ => None,
        })
    }

    /// Returns `true` for private (direct) message events.
    pub fn is_private(&self) -> bool {
        self.post_type == PostType::Message && self.message_type.as_deref() == Some("private")
    }

    /// Conversation scope keys for context resolution, most specific first:
    /// `group:user` when both ids exist, then `user` alone.
    pub fn scope_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let (Some(group), Some(user)) = (self.group_id, self.user_id) {
            keys.push(format!("{group}:{user}"));
        }
        if let Some(user) = self.user_id {
            keys.push(user.to_string());
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_message(segments: Vec<Segment>) -> Event {
        Event {
            message_type: Some("group".into()),
            self_id: 10,
            user_id: Some(2000),
            group_id: Some(3000),
            message_id: Some(1),
            message: segments,
            ..Event::default()
        }
    }

    #[test]
    fn descriptor_chains() {
        let mut e = group_message(vec![]);
        assert_eq!(e.descriptor(), "message.group");

        e.post_type = PostType::Notice;
        e.message_type = None;
        e.notice_type = Some("group_increase".into());
        e.sub_type = Some("approve".into());
        assert_eq!(e.descriptor(), "notice.group_increase.approve");

        e.post_type = PostType::MetaEvent;
        e.notice_type = None;
        e.sub_type = None;
        e.meta_event_type = Some("heartbeat".into());
        assert_eq!(e.descriptor(), "meta_event.heartbeat");
    }

    #[test]
    fn plain_text_strips_space_after_at() {
        let e = group_message(vec![Segment::at(10), Segment::text(" ping")]);
        assert_eq!(e.plain_text(), "ping");

        // Only one leading space is removed.
        let e = group_message(vec![Segment::at(10), Segment::text("  ping")]);
        assert_eq!(e.plain_text(), "ping"); // trim handles the remainder

        let e = group_message(vec![Segment::text("a"), Segment::text("b")]);
        assert_eq!(e.plain_text(), "ab");
    }

    #[test]
    fn at_ignores_mention_all() {
        let e = group_message(vec![Segment::at_all(), Segment::text("hi")]);
        assert_eq!(e.at(), None);

        let e = group_message(vec![Segment::at(42), Segment::text("hi")]);
        assert_eq!(e.at(), Some("42"));
    }

    #[test]
    fn scope_keys_order() {
        let e = group_message(vec![]);
        assert_eq!(e.scope_keys(), vec!["3000:2000".to_string(), "2000".to_string()]);

        let mut e = group_message(vec![]);
        e.group_id = None;
        assert_eq!(e.scope_keys(), vec!["2000".to_string()]);
    }

    #[test]
    fn parse_raw_frame() {
        let raw = r#"{
            "post_type": "message",
            "message_type": "group",
            "time": 1700000000,
            "self_id": 123456,
            "user_id": 2000,
            "group_id": 3000,
            "message_id": 77,
            "message": [{"type":"text","data":{"text":"ping"}}]
        }"#;
        let e = Event::from_json(raw).unwrap();
        assert_eq!(e.post_type, PostType::Message);
        assert_eq!(e.plain_text(), "ping");
        assert!(e.raw.is_some());
    }
}
