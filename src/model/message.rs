use crate::ids::{MessageId, PartyId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Direct,
    Broadcast,
    HandoffContext,
    StatusUpdate,
}

/// A message routed between sessions (§3.1), either point-to-point or
/// fanned out to a party via `broadcast_to_party`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterSessionMessage {
    pub id: MessageId,
    pub from_session_id: SessionId,
    pub to_session_id: Option<SessionId>,
    pub party_id: Option<PartyId>,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InterSessionMessage {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}
