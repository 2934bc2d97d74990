//! JSON wire envelope exchanged with browser editors.
//!
//! Wire format (one JSON object per WebSocket text frame):
//! ```text
//! {
//!   "action":      "join" | "edit" | "leave" | "presence-query" | "system" | "presence-update",
//!   "room":        "<room id>",            (optional)
//!   "user":        "<display name>",       (optional)
//!   "userId":      "<connection/user id>", (optional)
//!   "change":      <any JSON>,             (optional, opaque, forwarded verbatim)
//!   "clients":     [ { user, userId, joinedAt, isOnline } ],  (presence only)
//!   "clientCount": <int>,                  (presence only)
//!   "timestamp":   "<RFC 3339>"            (server-stamped)
//! }
//! ```
//!
//! The hub never interprets `change`. It is kept as a [`RawValue`] so the
//! original bytes survive decode/encode untouched, and `edit` frames are
//! relayed as the exact text that arrived.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::presence::{MemberInfo, PresenceSnapshot};

/// One outbound or inbound text frame. Cheap to clone across many mailboxes.
pub type Frame = Arc<str>;

/// Envelope discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Join,
    Edit,
    Leave,
    PresenceQuery,
    System,
    PresenceUpdate,
    /// Anything else. Kept so the read pump can log it and move on.
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Join => "join",
            Action::Edit => "edit",
            Action::Leave => "leave",
            Action::PresenceQuery => "presence-query",
            Action::System => "system",
            Action::PresenceUpdate => "presence-update",
            Action::Unknown(other) => other,
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Action::Unknown(String::new())
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "join" => Action::Join,
            "edit" => Action::Edit,
            "leave" => Action::Leave,
            "presence-query" => Action::PresenceQuery,
            "system" => Action::System,
            "presence-update" => Action::PresenceUpdate,
            _ => Action::Unknown(value),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Unknown(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level protocol message.
///
/// Every field but `action` is optional; missing fields decode as `None`
/// and are omitted on encode. A field of the wrong JSON type also decodes as
/// `None`, so a well-formed JSON object never fails to decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient_action")]
    pub action: Action,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque edit/system payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Box<RawValue>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<MemberInfo>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub client_count: Option<usize>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Decode a field, or `None` when its JSON type is not the expected one.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// A non-string discriminator is an unknown action, not a decode error.
fn lenient_action<'de, D>(deserializer: D) -> Result<Action, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(name) => Action::from(name),
        other => Action::Unknown(other.to_string()),
    })
}

impl Envelope {
    /// Server-authored human readable notice, e.g. "alice joined the room".
    pub fn system(room: &str, text: &str) -> Self {
        let change = serde_json::value::to_raw_value(&serde_json::json!({ "text": text })).ok();
        Self {
            action: Action::System,
            room: Some(room.to_owned()),
            change,
            timestamp: Some(server_timestamp()),
            ..Self::default()
        }
    }

    /// Membership listing computed by the room loop.
    pub fn presence_update(room: &str, snapshot: PresenceSnapshot) -> Self {
        Self {
            action: Action::PresenceUpdate,
            room: Some(room.to_owned()),
            client_count: Some(snapshot.client_count),
            clients: Some(snapshot.clients),
            timestamp: Some(server_timestamp()),
            ..Self::default()
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        let text = serde_json::to_string(self).map_err(ProtocolError::Encode)?;
        Ok(Frame::from(text))
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Raw JSON text of the payload, if any.
    pub fn change_json(&self) -> Option<&str> {
        self.change.as_deref().map(RawValue::get)
    }

    /// Display name carried by the envelope, with blanks treated as absent.
    pub fn display_name(&self) -> Option<&str> {
        self.user.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }
}

/// RFC 3339 wall clock time, UTC.
pub fn server_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}
