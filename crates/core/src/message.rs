use serde::{Deserialize, Serialize};

use crate::compression::MessageBody;
use crate::identity::{format_timestamp, NodeId, WireId};
use crate::protocol::{ChatKind, MessageKind};

/// Conversation a message belongs to.
///
/// `id` is the 5-byte scope id: the group id for group chats and the peer's
/// wire id for direct chats. Broadcast has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatScope {
    pub kind: ChatKind,
    pub id: Option<WireId>,
}

impl ChatScope {
    pub fn broadcast() -> Self {
        Self { kind: ChatKind::Broadcast, id: None }
    }

    /// Group scope from its textual id (first 5 bytes are used).
    pub fn group(group_id: &str) -> Self {
        Self { kind: ChatKind::Group, id: Some(WireId::from_label(group_id)) }
    }

    pub fn direct(peer: NodeId) -> Self {
        Self { kind: ChatKind::Direct, id: Some(peer.to_wire()) }
    }
}

impl Default for ChatScope {
    fn default() -> Self {
        Self::broadcast()
    }
}

/// The message being replied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyRef {
    pub sender: NodeId,
    pub message_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageStatus {
    Complete,
    Receiving { received: u8, total: u8 },
    Failed { received: u8, total: u8 },
}

impl MessageStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, MessageStatus::Complete)
    }
}

/// A message as surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalMessage {
    pub sender: NodeId,
    pub message_id: NodeId,
    pub scope: ChatScope,
    pub reply_to: Option<ReplyRef>,
    pub kind: MessageKind,
    pub body: MessageBody,
    pub status: MessageStatus,
    pub is_self: bool,
    pub chunk_count: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<u8>,
}

impl LogicalMessage {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// `hh:mm:ss AM | dd-MM-yyyy | NC` label derived from the message id.
    pub fn timestamp_label(&self) -> String {
        format_timestamp(self.message_id, self.chunk_count)
    }
}

/// What the application hands to the send path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub scope: ChatScope,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
    pub body: MessageBody,
}

impl OutboundMessage {
    pub fn broadcast(body: MessageBody) -> Self {
        Self { scope: ChatScope::broadcast(), reply_to: None, body }
    }

    pub fn to_scope(scope: ChatScope, body: MessageBody) -> Self {
        Self { scope, reply_to: None, body }
    }

    pub fn replying_to(mut self, reply: ReplyRef) -> Self {
        self.reply_to = Some(reply);
        self
    }
}

/// Encoded frames ready for the transport plus the local copy of the message.
#[derive(Debug, Clone)]
pub struct OutboundBatch {
    pub frames: Vec<Vec<u8>>,
    pub message: LogicalMessage,
}
