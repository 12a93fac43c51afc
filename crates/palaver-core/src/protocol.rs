//! Wire frames for the chat protocol.
//!
//! Every frame is a single JSON text with a `"type"` discriminator.
//! Inbound frames are decoded in two stages: the discriminator is read
//! first so an unrecognized type can be reported back verbatim, then the
//! known frame is decoded with lenient field defaults (a login with a
//! missing username authenticates as the empty string and fails at the
//! store, it does not fail parsing).

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// Frames a client may send.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Login {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Send {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        sticker: Option<String>,
        #[serde(default)]
        reply_to: Option<i64>,
    },
    WhoOnline,
    AdminCreateUser {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        is_admin: bool,
    },
    Join,
    HistoryRoom,
}

/// Frames the server sends.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    LoginOk { username: String, is_admin: bool },
    LoginError { message: String },
    History { messages: Vec<ChatMessage> },
    Message { message: ChatMessage },
    Presence { online: Vec<String> },
    AdminCreateUserOk { username: String },
    AdminCreateUserError { message: String },
    Error { message: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Why an inbound frame could not be turned into a [`ClientFrame`].
/// The Display strings are the exact reply messages clients see.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum FrameParseError {
    #[error("Invalid JSON")]
    Invalid,
    #[error("Unknown type: {0}")]
    UnknownType(String),
}

const FRAME_TYPES: &[&str] = &[
    "login",
    "send",
    "who_online",
    "admin_create_user",
    "join",
    "history_room",
];

impl ClientFrame {
    /// Decode one raw frame. Unknown discriminators are distinguished from
    /// unparseable payloads so the dispatcher can answer each per the
    /// protocol.
    pub fn parse(raw: &str) -> Result<Self, FrameParseError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| FrameParseError::Invalid)?;
        let ty = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(FrameParseError::Invalid)?;
        if !FRAME_TYPES.contains(&ty) {
            return Err(FrameParseError::UnknownType(ty.to_string()));
        }
        serde_json::from_value(value).map_err(|_| FrameParseError::Invalid)
    }
}
