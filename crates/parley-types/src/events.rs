use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ConversationSummary, MessageView};

/// Events sent over the WebSocket gateway. View events always carry the
/// complete current state of the subscribed view, never a diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, handle: String },

    /// Full ordered message log of a subscribed conversation
    ConversationView {
        conversation_id: Uuid,
        messages: Vec<MessageView>,
    },

    /// Full inbox of the connected user, ordered by recent activity
    InboxView { conversations: Vec<ConversationSummary> },

    /// An out-of-band alert decided by the notification gate
    Notify {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        preview: String,
    },

    /// A failure the client should surface; the subscription that produced
    /// it stays alive
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving full-state views of one conversation
    Subscribe { conversation_id: Uuid },

    /// Stop receiving views of one conversation
    Unsubscribe { conversation_id: Uuid },

    /// Start receiving full-state inbox views (also arms notifications)
    SubscribeInbox,

    /// Tell the notification gate which conversation is on screen, if any
    SetViewing { conversation_id: Option<Uuid> },

    /// Mark the other participant's messages in a conversation as read
    MarkRead { conversation_id: Uuid },
}
