use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{LastMessage, Participant};

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and parley-gateway
/// (WebSocket authentication). Canonical definition lives here in
/// parley-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub handle: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub handle: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub token: String,
}

// -- Profile --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// -- Contacts --

/// Exactly one of `target_id` or `code` must be set: manual entry sends the
/// id directly, the scan flow sends the raw scanned string.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddContactRequest {
    pub target_id: Option<Uuid>,
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddContactResponse {
    pub target_id: Uuid,
    /// false means the contact already existed; the call is still a success.
    pub added: bool,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OpenConversationResponse {
    pub conversation_id: Uuid,
    /// false means the conversation already existed for this pair.
    pub created: bool,
}

/// One row of the inbox: a conversation annotated with the other
/// participant's display info and the cached last message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub other: Participant,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
}

impl ConversationSummary {
    /// Timestamp used for inbox ordering: last activity, falling back to
    /// creation time.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.timestamp)
            .unwrap_or(self.created_at)
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ReactResponse {
    pub added: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardRequest {
    pub to_conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslateRequest {
    pub target_language: String,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub translated_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// One message as delivered to viewers, reactions already grouped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_deleted: bool,
    pub is_forwarded: bool,
    pub reactions: Vec<ReactionGroup>,
}
