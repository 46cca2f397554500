use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Replacement text written over a soft-deleted message. The row itself
/// keeps its id and position in the log.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

/// The slice of a user needed to render them inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: String,
}

/// Denormalized copy of a conversation's most recent message, stored on the
/// conversation row so the inbox renders without scanning message logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub text: String,
    pub sender_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}
