//! Database row types — these map directly to SQLite rows.
//! Conversion to the wire-facing types in parley-types happens here so the
//! queries stay focused on SQL.

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_types::api::{MessageView, ReactionGroup};
use parley_types::models::{LastMessage, Participant, User};

pub struct UserRow {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: String,
    pub password: String,
    pub created_at: i64,
}

impl UserRow {
    pub fn to_user(&self) -> User {
        User {
            id: parse_id(&self.id),
            handle: self.handle.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            created_at: ms_to_dt(self.created_at),
        }
    }

    pub fn to_participant(&self) -> Participant {
        Participant {
            id: parse_id(&self.id),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

pub struct ConversationRow {
    pub id: String,
    pub participant_lo: String,
    pub participant_hi: String,
    pub created_at: i64,
    pub last_message_id: Option<String>,
    pub last_message_text: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<i64>,
    pub last_message_read: bool,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        let id = user_id.to_string();
        self.participant_lo == id || self.participant_hi == id
    }

    pub fn conversation_id(&self) -> Uuid {
        parse_id(&self.id)
    }

    pub fn participant_ids(&self) -> [Uuid; 2] {
        [parse_id(&self.participant_lo), parse_id(&self.participant_hi)]
    }

    /// The participant that is not `me`.
    pub fn other_participant_id(&self, me: Uuid) -> Uuid {
        if self.participant_lo == me.to_string() {
            parse_id(&self.participant_hi)
        } else {
            parse_id(&self.participant_lo)
        }
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        let id = self.last_message_id.as_deref()?;
        let text = self.last_message_text.as_deref()?;
        let sender = self.last_message_sender.as_deref()?;
        let at = self.last_message_at?;
        Some(LastMessage {
            message_id: parse_id(id),
            text: text.to_string(),
            sender_id: parse_id(sender),
            timestamp: ms_to_dt(at),
            is_read: self.last_message_read,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: i64,
    pub is_read: bool,
    pub is_deleted: bool,
    pub is_forwarded: bool,
}

impl MessageRow {
    pub fn conversation_uuid(&self) -> Uuid {
        parse_id(&self.conversation_id)
    }

    pub fn to_view(&self, reactions: Vec<ReactionGroup>) -> MessageView {
        MessageView {
            id: parse_id(&self.id),
            conversation_id: parse_id(&self.conversation_id),
            sender_id: parse_id(&self.sender_id),
            text: self.text.clone(),
            created_at: ms_to_dt(self.created_at),
            is_read: self.is_read,
            is_deleted: self.is_deleted,
            is_forwarded: self.is_forwarded,
            reactions,
        }
    }
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// Timestamps are stored as unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::default())
}

pub(crate) fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", raw, e);
        Uuid::default()
    })
}
