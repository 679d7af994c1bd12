//! Message segment types.
//!
//! A segment is one unit of content in a message: plain text, an @mention,
//! an emoji face, an image, or a reply reference. Segments arrive from the
//! gateway as `{"type": ..., "data": {...}}` objects and are serialized back
//! in the same shape for outbound actions.

use serde::{Deserialize, Serialize};

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text content.
    Text(TextData),
    /// @mention of one user, or `"all"` for everyone.
    At(AtData),
    /// Platform emoji/face.
    Face(FaceData),
    /// Image by file name, path, or URL.
    Image(ImageData),
    /// Reply reference to an earlier message.
    Reply(ReplyData),
}

/// Plain text segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

/// @mention segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtData {
    /// Target user id, or `"all"` to mention everyone.
    pub qq: String,
}

/// Emoji/face segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    pub id: String,
}

/// Image segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub file: String,
    /// Image URL (receive only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Reply-reference segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// Id of the message being replied to.
    pub id: String,
}

impl Segment {
    /// Creates a plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// Creates an @mention segment for a specific user.
    pub fn at(user_id: i64) -> Self {
        Segment::At(AtData {
            qq: user_id.to_string(),
        })
    }

    /// Creates an @all segment.
    pub fn at_all() -> Self {
        Segment::At(AtData {
            qq: "all".to_string(),
        })
    }

    /// Creates a face segment.
    pub fn face(id: i32) -> Self {
        Segment::Face(FaceData { id: id.to_string() })
    }

    /// Creates an image segment from a file name, path, or URL.
    pub fn image(file: impl Into<String>) -> Self {
        Segment::Image(ImageData {
            file: file.into(),
            url: None,
        })
    }

    /// Creates a reply segment referencing another message.
    pub fn reply(id: impl Into<String>) -> Self {
        Segment::Reply(ReplyData { id: id.into() })
    }

    /// Returns the text content for text segments, `None` otherwise.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(data) => Some(&data.text),
            _ => None,
        }
    }

    /// Returns `true` for @mention segments.
    pub fn is_at(&self) -> bool {
        matches!(self, Segment::At(_))
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Text(data) => write!(f, "{}", data.text),
            Segment::At(data) => write!(f, "@{}", data.qq),
            Segment::Face(data) => write!(f, "[face:{}]", data.id),
            Segment::Image(data) => write!(f, "[image:{}]", data.file),
            Segment::Reply(data) => write!(f, "[reply:{}]", data.id),
        }
    }
}
