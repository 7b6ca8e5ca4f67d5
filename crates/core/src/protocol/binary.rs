//! nearchat binary frame codec
//!
//! Every advertisement carries one frame: a fixed 13-byte header followed by
//! a slice of the message stream.
//!
//! ```text
//! byte 0:      [chatKind:3][isReply:1][msgKind:4]
//! bytes 1-5:   sender wire id
//! bytes 6-10:  message wire id
//! byte 11:     total chunk count (1..=255)
//! byte 12:     chunk index (0-based)
//! bytes 13..:  chunk bytes
//! ```
//!
//! The message stream is the scope prefix (scope id and/or reply ids)
//! followed by the ciphertext. The codec only interprets the prefix on
//! request; frames themselves are opaque slices.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::frame::{
    DEFAULT_PAYLOAD_BUDGET, HEADER_SIZE, MAX_CHUNKS, MIN_PAYLOAD_BUDGET, REPLY_REF_SIZE, SCOPE_ID_SIZE,
};
use crate::error::{FrameError, ProtocolError, Result};
use crate::identity::{NodeId, WireId, WIRE_ID_LEN};
use crate::message::ReplyRef;

// ============================================================================
// HEADER FIELDS
// ============================================================================

const IS_REPLY_FLAG: u8 = 0x10;
const MESSAGE_KIND_MASK: u8 = 0x0F;
const CHAT_KIND_SHIFT: u8 = 5;

/// Conversation kind carried in the top 3 bits of the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChatKind {
    Broadcast = 0,
    Group = 2,
    Direct = 3,
}

impl ChatKind {
    pub fn try_from_u8(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0 => Ok(ChatKind::Broadcast),
            2 => Ok(ChatKind::Group),
            3 => Ok(ChatKind::Direct),
            other => Err(FrameError::ReservedChatKind(other)),
        }
    }

    /// Group and direct streams start with a 5-byte scope id.
    pub fn has_scope_id(self) -> bool {
        !matches!(self, ChatKind::Broadcast)
    }
}

/// How the plaintext of a message is encoded, low nibble of the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// 5-bit text and/or link segments
    PlainCompressed = 0,
    /// Raw UTF-8 text, literal marker stripped
    LiteralUnicode = 1,
    /// `g//` reference text, sent as raw UTF-8
    LinkReference = 2,
}

impl MessageKind {
    pub fn try_from_u8(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0 => Ok(MessageKind::PlainCompressed),
            1 => Ok(MessageKind::LiteralUnicode),
            2 => Ok(MessageKind::LinkReference),
            other => Err(FrameError::UnknownMessageKind(other)),
        }
    }
}

// ============================================================================
// PAYLOAD BUDGET
// ============================================================================

/// Bytes one frame may occupy in an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadBudget(usize);

impl PayloadBudget {
    pub const DEFAULT: PayloadBudget = PayloadBudget(DEFAULT_PAYLOAD_BUDGET);
    pub const MIN: PayloadBudget = PayloadBudget(MIN_PAYLOAD_BUDGET);

    /// Budgets below the floor are raised to it.
    pub fn new(bytes: usize) -> Self {
        Self(bytes.max(MIN_PAYLOAD_BUDGET))
    }

    pub fn bytes(self) -> usize {
        self.0
    }

    /// Chunk bytes left after the header.
    pub fn chunk_capacity(self) -> usize {
        self.0 - HEADER_SIZE
    }

    /// Frames needed for a stream of `len` bytes (at least one).
    pub fn chunks_for(self, len: usize) -> usize {
        len.div_ceil(self.chunk_capacity()).max(1)
    }
}

impl Default for PayloadBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ============================================================================
// FRAME STRUCTURE
// ============================================================================

/// Fields every frame of one message shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub chat_kind: ChatKind,
    pub is_reply: bool,
    pub message_kind: MessageKind,
    pub sender: NodeId,
    pub message_id: NodeId,
}

impl FrameHeader {
    pub fn header_byte(&self) -> u8 {
        let mut byte = (self.chat_kind as u8) << CHAT_KIND_SHIFT;
        if self.is_reply {
            byte |= IS_REPLY_FLAG;
        }
        byte | (self.message_kind as u8 & MESSAGE_KIND_MASK)
    }

    pub fn frame(&self, total_chunks: u8, chunk_index: u8, chunk: Vec<u8>) -> WireFrame {
        WireFrame {
            chat_kind: self.chat_kind,
            is_reply: self.is_reply,
            message_kind: self.message_kind,
            sender: self.sender,
            message_id: self.message_id,
            total_chunks,
            chunk_index,
            chunk,
        }
    }
}

/// One decoded advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub chat_kind: ChatKind,
    pub is_reply: bool,
    pub message_kind: MessageKind,
    pub sender: NodeId,
    pub message_id: NodeId,
    pub total_chunks: u8,
    pub chunk_index: u8,
    pub chunk: Vec<u8>,
}

impl WireFrame {
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            chat_kind: self.chat_kind,
            is_reply: self.is_reply,
            message_kind: self.message_kind,
            sender: self.sender,
            message_id: self.message_id,
        }
    }

    pub fn header_byte(&self) -> u8 {
        self.header().header_byte()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.chunk.len()
    }

    /// Encode without a size check.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());

        buffer.put_u8(self.header_byte());
        buffer.put_slice(self.sender.to_wire().as_bytes());
        buffer.put_slice(self.message_id.to_wire().as_bytes());
        buffer.put_u8(self.total_chunks);
        buffer.put_u8(self.chunk_index);
        buffer.put_slice(&self.chunk);

        trace!(
            "Encoded frame {}/{} of {} ({} bytes)",
            self.chunk_index + 1,
            self.total_chunks,
            self.message_id,
            buffer.len()
        );

        buffer.to_vec()
    }

    /// Encode, failing if the frame does not fit `budget`.
    pub fn encode_within(&self, budget: PayloadBudget) -> Result<Vec<u8>> {
        let size = self.encoded_len();
        if size > budget.bytes() {
            return Err(ProtocolError::FrameTooLarge { size, budget: budget.bytes() });
        }
        Ok(self.encode())
    }

    /// Decode one advertisement.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort { required: HEADER_SIZE, actual: data.len() }.into());
        }

        let mut cursor = std::io::Cursor::new(data);

        let header = cursor.get_u8();
        let chat_kind = ChatKind::try_from_u8(header >> CHAT_KIND_SHIFT)?;
        let is_reply = header & IS_REPLY_FLAG != 0;
        let message_kind = MessageKind::try_from_u8(header & MESSAGE_KIND_MASK)?;

        let sender = get_wire_id(&mut cursor);
        let message_id = get_wire_id(&mut cursor);

        let total_chunks = cursor.get_u8();
        let chunk_index = cursor.get_u8();

        if total_chunks == 0 {
            return Err(FrameError::ZeroChunkCount.into());
        }
        if chunk_index >= total_chunks {
            return Err(FrameError::ChunkIndexOutOfRange { index: chunk_index, total: total_chunks }.into());
        }

        let chunk = data[HEADER_SIZE..].to_vec();

        Ok(WireFrame {
            chat_kind,
            is_reply,
            message_kind,
            sender: sender.to_node_id(),
            message_id: message_id.to_node_id(),
            total_chunks,
            chunk_index,
            chunk,
        })
    }

    /// Scope/reply prefix, when this is chunk 0 and it holds the whole prefix.
    pub fn scope_prefix(&self) -> Option<ScopePrefix> {
        if self.chunk_index != 0 {
            return None;
        }
        ScopePrefix::split(self.chat_kind, self.is_reply, &self.chunk)
            .ok()
            .map(|(prefix, _)| prefix)
    }
}

// ============================================================================
// SCOPE PREFIX
// ============================================================================

/// Leading bytes of a message stream naming the conversation and the message
/// being replied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopePrefix {
    pub scope_id: Option<WireId>,
    pub reply_to: Option<ReplyRef>,
}

impl ScopePrefix {
    pub fn required_len(chat_kind: ChatKind, is_reply: bool) -> usize {
        let scope = if chat_kind.has_scope_id() { SCOPE_ID_SIZE } else { 0 };
        let reply = if is_reply { REPLY_REF_SIZE } else { 0 };
        scope + reply
    }

    pub fn encoded_len(&self) -> usize {
        self.scope_id.map_or(0, |_| SCOPE_ID_SIZE) + self.reply_to.map_or(0, |_| REPLY_REF_SIZE)
    }

    pub fn put(&self, buffer: &mut impl BufMut) {
        if let Some(scope_id) = &self.scope_id {
            buffer.put_slice(scope_id.as_bytes());
        }
        if let Some(reply) = &self.reply_to {
            buffer.put_slice(reply.sender.to_wire().as_bytes());
            buffer.put_slice(reply.message_id.to_wire().as_bytes());
        }
    }

    /// Parse the prefix off `stream`, returning it and the remaining bytes.
    pub fn split(
        chat_kind: ChatKind,
        is_reply: bool,
        stream: &[u8],
    ) -> std::result::Result<(ScopePrefix, &[u8]), FrameError> {
        let required = Self::required_len(chat_kind, is_reply);
        if stream.len() < required {
            return Err(FrameError::TruncatedPrefix { required, actual: stream.len() });
        }

        let mut cursor = stream;

        let scope_id = if chat_kind.has_scope_id() {
            Some(get_wire_id(&mut cursor))
        } else {
            None
        };
        let reply_to = if is_reply {
            let sender = get_wire_id(&mut cursor).to_node_id();
            let message_id = get_wire_id(&mut cursor).to_node_id();
            Some(ReplyRef { sender, message_id })
        } else {
            None
        };

        Ok((ScopePrefix { scope_id, reply_to }, cursor))
    }
}

/// Caller guarantees at least 5 bytes remain.
fn get_wire_id(buf: &mut impl Buf) -> WireId {
    let mut id = [0u8; WIRE_ID_LEN];
    buf.copy_to_slice(&mut id);
    WireId::new(id)
}

// ============================================================================
// FRAGMENTATION
// ============================================================================

/// Slice `stream` into frames that each fit `budget`.
///
/// An empty stream still produces one (empty) frame.
pub fn fragment_stream(header: FrameHeader, stream: &[u8], budget: PayloadBudget) -> Result<Vec<WireFrame>> {
    let total = budget.chunks_for(stream.len());
    if total > MAX_CHUNKS {
        return Err(ProtocolError::MessageTooLarge { chunks: total, max: MAX_CHUNKS });
    }

    if stream.is_empty() {
        return Ok(vec![header.frame(1, 0, Vec::new())]);
    }

    let frames = stream
        .chunks(budget.chunk_capacity())
        .enumerate()
        .map(|(index, chunk)| header.frame(total as u8, index as u8, chunk.to_vec()))
        .collect();

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(chat_kind: ChatKind, is_reply: bool) -> FrameHeader {
        FrameHeader {
            chat_kind,
            is_reply,
            message_kind: MessageKind::PlainCompressed,
            sender: NodeId::new(0x01_0203_0405),
            message_id: NodeId::new(0x0A_0B0C_0D0E),
        }
    }

    #[test]
    fn test_header_byte_layout() {
        let mut h = header(ChatKind::Group, true);
        h.message_kind = MessageKind::LinkReference;
        assert_eq!(h.header_byte(), 0b010_1_0010);

        let h = header(ChatKind::Direct, false);
        assert_eq!(h.header_byte(), 0b011_0_0000);
    }

    #[test]
    fn test_encode_layout() {
        let frame = header(ChatKind::Broadcast, false).frame(2, 1, vec![0xAA, 0xBB]);
        let bytes = frame.encode();
        assert_eq!(
            bytes,
            vec![0x00, 1, 2, 3, 4, 5, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 2, 1, 0xAA, 0xBB]
        );
        assert_eq!(WireFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_decode_too_short() {
        let err = WireFrame::decode(&[0u8; 12]).unwrap_err();
        assert_eq!(err, ProtocolError::MalformedFrame(FrameError::TooShort { required: 13, actual: 12 }));
    }

    #[test]
    fn test_decode_rejects_bad_counts() {
        let mut bytes = header(ChatKind::Broadcast, false).frame(1, 0, vec![]).encode();
        bytes[11] = 0;
        assert_eq!(
            WireFrame::decode(&bytes),
            Err(ProtocolError::MalformedFrame(FrameError::ZeroChunkCount))
        );

        bytes[11] = 3;
        bytes[12] = 3;
        assert_eq!(
            WireFrame::decode(&bytes),
            Err(ProtocolError::MalformedFrame(FrameError::ChunkIndexOutOfRange { index: 3, total: 3 }))
        );
    }

    #[test]
    fn test_decode_rejects_reserved_kinds() {
        let mut bytes = header(ChatKind::Broadcast, false).frame(1, 0, vec![]).encode();
        bytes[0] = 1 << 5;
        assert!(matches!(
            WireFrame::decode(&bytes),
            Err(ProtocolError::MalformedFrame(FrameError::ReservedChatKind(1)))
        ));

        bytes[0] = 0x03;
        assert!(matches!(
            WireFrame::decode(&bytes),
            Err(ProtocolError::MalformedFrame(FrameError::UnknownMessageKind(3)))
        ));
    }

    #[test]
    fn test_encode_within_budget() {
        let budget = PayloadBudget::DEFAULT;
        let fits = header(ChatKind::Broadcast, false).frame(1, 0, vec![0; 14]);
        assert_eq!(fits.encode_within(budget).unwrap().len(), 27);

        let too_big = header(ChatKind::Broadcast, false).frame(1, 0, vec![0; 15]);
        assert_eq!(
            too_big.encode_within(budget),
            Err(ProtocolError::FrameTooLarge { size: 28, budget: 27 })
        );
    }

    #[test]
    fn test_budget_floor() {
        assert_eq!(PayloadBudget::new(5).bytes(), 20);
        assert_eq!(PayloadBudget::new(31).chunk_capacity(), 18);
        assert_eq!(PayloadBudget::DEFAULT.chunk_capacity(), 14);
    }

    #[test]
    fn test_fragment_count() {
        let budget = PayloadBudget::DEFAULT;
        for len in [0usize, 1, 14, 15, 28, 29, 100] {
            let frames = fragment_stream(header(ChatKind::Broadcast, false), &vec![7u8; len], budget).unwrap();
            assert_eq!(frames.len(), len.div_ceil(14).max(1));
            for (i, frame) in frames.iter().enumerate() {
                assert_eq!(frame.chunk_index as usize, i);
                assert_eq!(frame.total_chunks as usize, frames.len());
                assert!(frame.encoded_len() <= budget.bytes());
            }
            let joined: Vec<u8> = frames.iter().flat_map(|f| f.chunk.clone()).collect();
            assert_eq!(joined.len(), len);
        }
    }

    #[test]
    fn test_fragment_too_many_chunks() {
        let stream = vec![0u8; 14 * 255 + 1];
        let err = fragment_stream(header(ChatKind::Broadcast, false), &stream, PayloadBudget::DEFAULT).unwrap_err();
        assert_eq!(err, ProtocolError::MessageTooLarge { chunks: 256, max: 255 });
    }

    #[test]
    fn test_scope_prefix_split() {
        let reply = ReplyRef { sender: NodeId::new(11), message_id: NodeId::new(22) };
        let prefix = ScopePrefix { scope_id: Some(WireId::from_label("team")), reply_to: Some(reply) };
        let mut stream = BytesMut::new();
        prefix.put(&mut stream);
        stream.put_slice(b"body");
        assert_eq!(prefix.encoded_len(), 15);

        let (parsed, rest) = ScopePrefix::split(ChatKind::Group, true, &stream).unwrap();
        assert_eq!(parsed, prefix);
        assert_eq!(rest, b"body");
    }

    #[test]
    fn test_scope_prefix_broadcast_reply() {
        let reply = ReplyRef { sender: NodeId::new(1), message_id: NodeId::new(2) };
        let prefix = ScopePrefix { scope_id: None, reply_to: Some(reply) };
        let mut stream = Vec::new();
        prefix.put(&mut stream);
        let (parsed, rest) = ScopePrefix::split(ChatKind::Broadcast, true, &stream).unwrap();
        assert_eq!(parsed.reply_to, Some(reply));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_scope_prefix_truncated() {
        assert_eq!(
            ScopePrefix::split(ChatKind::Direct, false, &[1, 2, 3]),
            Err(FrameError::TruncatedPrefix { required: 5, actual: 3 })
        );
    }

    #[test]
    fn test_frame_scope_prefix_only_on_chunk_zero() {
        let h = header(ChatKind::Group, false);
        let first = h.frame(2, 0, b"team-rest".to_vec());
        assert_eq!(first.scope_prefix().and_then(|p| p.scope_id), Some(WireId::from_label("team-")));
        let second = h.frame(2, 1, b"team-rest".to_vec());
        assert_eq!(second.scope_prefix(), None);
    }
}
