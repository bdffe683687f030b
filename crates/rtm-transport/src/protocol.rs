//! Wire protocol and event codec.
//!
//! Inbound frames are decoded in two steps: a lenient generic decode into
//! [`WireEvent`], then a type-specific refinement into [`EventPayload`] once
//! the dispatcher has decided the frame is worth routing.

use rtm_core::User;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Subtype marking an edit notice.
pub const SUBTYPE_MESSAGE_CHANGED: &str = "message_changed";
/// Subtype marking a deletion notice.
pub const SUBTYPE_MESSAGE_DELETED: &str = "message_deleted";

/// Bytes of input shown before a decode error position.
const ERROR_CONTEXT_BYTES: usize = 40;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed frame (offset {offset:?}): {source}")]
    MalformedFrame {
        /// Byte offset of the error, when serde reported a position.
        offset: Option<usize>,
        /// Input preceding the offset.
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Event type tags the client understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Protocol-level handshake completion.
    Hello,
    Message,
    UserChange,
    Error,
    /// Any other tag.
    Other(String),
    /// Frame without a type tag (e.g. send acknowledgements).
    Untyped,
}

impl EventKind {
    /// Map a type tag to a kind.
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("hello") => Self::Hello,
            Some("message") => Self::Message,
            Some("user_change") => Self::UserChange,
            Some("error") => Self::Error,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Untyped,
        }
    }

    /// The wire tag of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Message => "message",
            Self::UserChange => "user_change",
            Self::Error => "error",
            Self::Other(tag) => tag,
            Self::Untyped => "",
        }
    }
}

/// The protocol's generic envelope.
///
/// Every field is optional; a field of the wrong JSON type reads as absent
/// (the `user` field of a `user_change` event is an object, not an id).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireEvent {
    pub id: Option<u64>,
    /// Correlation id being acknowledged, when it is a non-negative integer.
    pub reply_to: Option<u64>,
    /// A `reply_to` key is present, whatever its value.
    pub has_reply_to: bool,
    pub kind: Option<String>,
    pub subtype: Option<String>,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub text: Option<String>,
}

impl WireEvent {
    fn from_value(value: &Value) -> Self {
        let str_field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            id: value.get("id").and_then(Value::as_u64),
            reply_to: value.get("reply_to").and_then(Value::as_u64),
            has_reply_to: value.get("reply_to").is_some(),
            kind: str_field("type"),
            subtype: str_field("subtype"),
            user: str_field("user"),
            channel: str_field("channel"),
            text: str_field("text"),
        }
    }
}

/// Body of a `message` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageEvent {
    /// Empty when absent or null.
    #[serde(deserialize_with = "null_as_empty")]
    pub channel: String,
    pub user: Option<String>,
    pub text: Option<String>,
    pub subtype: Option<String>,
    pub ts: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of a `user_change` event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserChangeEvent {
    pub user: User,
}

/// Detail of an `error` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ErrorDetail {
    pub code: i64,
    pub msg: String,
}

/// Body of an `error` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    pub error: ErrorDetail,
}

/// Type-specific view of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Hello,
    Message(MessageEvent),
    UserChange(UserChangeEvent),
    Error(ErrorEvent),
    /// No typed payload for this kind.
    Other,
}

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub wire: WireEvent,
    /// The frame as parsed JSON, kept for refinement and extension handlers.
    pub raw: Value,
}

impl Frame {
    /// Decode raw frame bytes into the generic envelope.
    ///
    /// # Errors
    /// Returns `MalformedFrame` if the bytes are not valid JSON.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw: Value = serde_json::from_slice(bytes).map_err(|source| {
            let offset = byte_offset(bytes, source.line(), source.column());
            let context = offset
                .map(|end| {
                    let start = end.saturating_sub(ERROR_CONTEXT_BYTES);
                    String::from_utf8_lossy(&bytes[start..end]).into_owned()
                })
                .unwrap_or_default();
            CodecError::MalformedFrame {
                offset,
                context,
                source,
            }
        })?;

        Ok(Self {
            wire: WireEvent::from_value(&raw),
            raw,
        })
    }

    /// Kind of this frame.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(self.wire.kind.as_deref())
    }

    /// The frame acknowledges one of our sends.
    #[must_use]
    pub const fn is_acknowledgement(&self) -> bool {
        self.wire.has_reply_to
    }

    /// The frame announces an edit or deletion of earlier content.
    #[must_use]
    pub fn is_edit_notice(&self) -> bool {
        matches!(
            self.wire.subtype.as_deref(),
            Some(SUBTYPE_MESSAGE_CHANGED | SUBTYPE_MESSAGE_DELETED)
        )
    }

    /// Acknowledgements and edit notices never reach handlers.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.is_acknowledgement() || self.is_edit_notice()
    }

    /// Decode the type-specific payload.
    ///
    /// # Errors
    /// Returns `Payload` if the frame does not match its type's shape.
    pub fn payload(&self) -> Result<EventPayload, CodecError> {
        match self.kind() {
            EventKind::Hello => Ok(EventPayload::Hello),
            EventKind::Message => refine(&self.raw, "message").map(EventPayload::Message),
            EventKind::UserChange => refine(&self.raw, "user_change").map(EventPayload::UserChange),
            EventKind::Error => refine(&self.raw, "error").map(EventPayload::Error),
            EventKind::Other(_) | EventKind::Untyped => Ok(EventPayload::Other),
        }
    }
}

fn refine<T: DeserializeOwned>(raw: &Value, kind: &'static str) -> Result<T, CodecError> {
    T::deserialize(raw).map_err(|source| CodecError::Payload { kind, source })
}

/// Convert serde's 1-based line/column into a byte offset.
fn byte_offset(input: &[u8], line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let line_start: usize = input
        .split_inclusive(|b| *b == b'\n')
        .take(line - 1)
        .map(<[u8]>::len)
        .sum();
    Some((line_start + column).min(input.len()))
}

/// An outbound event before it has a correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundIntent {
    pub kind: String,
    pub channel: String,
    pub text: String,
}

impl OutboundIntent {
    /// A `message` intent.
    #[must_use]
    pub fn message(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            channel: channel.into(),
            text: text.into(),
        }
    }
}

#[derive(Serialize)]
struct OutboundEvent<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'a str,
    channel: &'a str,
    text: &'a str,
}

/// Correlation id counter for one connection.
///
/// An id is consumed only when encoding succeeds, so ids carry no gaps.
#[derive(Debug, Default)]
pub struct Sequence {
    last: u64,
}

impl Sequence {
    /// A counter whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// The most recently assigned id, 0 before the first.
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.last
    }

    /// Assign the next id to `intent` and produce its wire text.
    ///
    /// # Errors
    /// Returns `Encode` if serialization fails; no id is consumed.
    pub fn encode(&mut self, intent: &OutboundIntent) -> Result<(u64, String), CodecError> {
        let id = self.last + 1;
        let json = serde_json::to_string(&OutboundEvent {
            id,
            kind: &intent.kind,
            channel: &intent.channel,
            text: &intent.text,
        })
        .map_err(CodecError::Encode)?;
        self.last = id;
        Ok((id, json))
    }
}
