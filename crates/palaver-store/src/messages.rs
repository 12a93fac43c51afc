use chrono::Utc;
use tracing::instrument;

use palaver_core::message::{ChatMessage, MessageKind};

use crate::database::Database;
use crate::error::StoreError;

/// Rooms are disabled; every message lands in the single shared room.
const ROOM: &str = "general";

pub const MAX_CONTENT_CHARS: usize = 2000;
pub const HISTORY_MAX: u32 = 200;

/// A freshly inserted message, before the sender's identity is
/// denormalized onto it by the caller.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub id: i64,
    pub kind: MessageKind,
    pub sticker: Option<String>,
    pub reply_to: Option<i64>,
    pub content: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Validate and persist one message. `reply_to` is stored without
    /// checking the referenced id exists. Validation messages are
    /// wire-facing and surfaced verbatim.
    #[instrument(skip(self, content, sticker))]
    pub fn insert(
        &self,
        user_id: i64,
        content: &str,
        kind: &str,
        sticker: Option<&str>,
        reply_to: Option<i64>,
    ) -> Result<NewMessage, StoreError> {
        // Unknown kinds degrade to text rather than erroring.
        let kind = kind
            .trim()
            .to_lowercase()
            .parse::<MessageKind>()
            .unwrap_or(MessageKind::Text);

        let content = content.trim();
        if kind == MessageKind::Text && content.is_empty() {
            return Err(StoreError::validation("Empty message"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(StoreError::validation(
                "Message is too long (max 2000 chars)",
            ));
        }

        let sticker = match kind {
            MessageKind::Sticker => {
                let token = sticker.unwrap_or("").trim();
                if token.is_empty() {
                    return Err(StoreError::validation("Sticker is empty"));
                }
                Some(token.to_string())
            }
            MessageKind::Text => sticker.map(str::to_string),
        };

        // Sticker messages store an empty content column.
        let content = match kind {
            MessageKind::Text => content,
            MessageKind::Sticker => "",
        };

        let now = Utc::now().to_rfc3339();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (room, user_id, kind, sticker, reply_to, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    ROOM,
                    user_id,
                    kind.to_string(),
                    sticker,
                    reply_to,
                    content,
                    now
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(NewMessage {
            id,
            kind,
            sticker,
            reply_to,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Fetch the newest `limit` messages (clamped to 1..=200), returned
    /// oldest first with usernames joined in.
    #[instrument(skip(self))]
    pub fn fetch_history(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        let limit = limit.clamp(1, HISTORY_MAX);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.user_id, u.username, m.kind, m.sticker, m.reply_to,
                        m.content, m.created_at
                 FROM messages m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.room = ?1
                 ORDER BY m.id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![ROOM, limit], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    username: row.get(2)?,
                    kind: row
                        .get::<_, String>(3)?
                        .parse()
                        .unwrap_or(MessageKind::Text),
                    sticker: row.get(4)?,
                    reply_to: row.get(5)?,
                    content: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?;
            let mut messages: Vec<ChatMessage> = rows.collect::<Result<_, _>>()?;
            messages.reverse();
            Ok(messages)
        })
    }
}
