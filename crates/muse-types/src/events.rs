use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },

    /// A direct message addressed to this user was stored
    MessageCreate {
        conversation_id: Uuid,
        message: MessageView,
    },

    /// The peer read the messages this user sent them
    MessagesRead { reader_id: Uuid, count: usize },

    /// The peer started or stopped typing
    TypingStart {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
}

impl GatewayEvent {
    /// Presence is the only event fanned out to every connection;
    /// everything else is addressed to a single user.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::PresenceUpdate { .. })
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Mark every unread message from `sender_id` as read
    MarkRead { sender_id: Uuid },

    /// Typing indicator for a conversation
    Typing { conversation_id: Uuid, is_typing: bool },
}
