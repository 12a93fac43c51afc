use serde::{Deserialize, Serialize};

/// What a chat message carries: plain text or a sticker token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Sticker,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Sticker => write!(f, "sticker"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "sticker" => Ok(Self::Sticker),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// One room message as it travels between the store, the dispatcher, and
/// the broadcast engine. `username` is denormalized from the sending
/// session at broadcast time (and joined in for history reads). Immutable
/// once created; `reply_to` is carried as-is without checking the
/// referenced id exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub kind: MessageKind,
    pub sticker: Option<String>,
    pub reply_to: Option<i64>,
    pub content: String,
    pub created_at: String,
}
