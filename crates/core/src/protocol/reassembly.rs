//! Message reassembly engine
//!
//! Turns outbound messages into frames and inbound frames back into
//! messages. Frames of one message are buffered under (sender, message id)
//! until every chunk index has arrived, in any order. Buffers that wait
//! longer than the reassembly timeout are swept and reported as failed.
//!
//! One mutex guards the buffer table. Lookup, insert, completion and removal
//! all happen under it, as does the whole expiry sweep, so a buffer is
//! either delivered or reported failed, never both.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::binary::{fragment_stream, ChatKind, FrameHeader, MessageKind, PayloadBudget, ScopePrefix, WireFrame};
use crate::compression::{encode_payload, parse_payload, MessageBody, LINK_REFERENCE_PREFIX, MARKER_LITERAL};
use crate::constants::limits::{MAX_PENDING_BUFFERS, MAX_RETAINED_MESSAGES};
use crate::crypto::ChatCipher;
use crate::error::{ProtocolError, Result};
use crate::identity::{IdGenerator, NodeId};
use crate::message::{ChatScope, LogicalMessage, MessageStatus, OutboundBatch, OutboundMessage, ReplyRef};
use crate::messaging::SecretResolver;

type BufferKey = (NodeId, NodeId);

// ============================================================================
// OUTCOMES
// ============================================================================

/// Why an inbound frame did not advance any message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Bytes did not decode as a frame, or the stream was too short for its prefix
    Malformed,
    /// Our own advertisement heard back
    SelfEcho,
    /// Total chunk count differs from the buffer's
    ChunkCountMismatch,
    /// Chunk index already stored
    Duplicate,
    /// Message was delivered recently
    AlreadyDelivered,
    /// Too many partial messages pending
    TableFull,
}

/// Result of feeding one frame to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum InboundOutcome {
    Dropped(DropReason),
    /// Chunk stored, message still incomplete
    Progress(LogicalMessage),
    /// Last chunk arrived; the buffer is gone
    Complete(LogicalMessage),
}

impl InboundOutcome {
    pub fn message(&self) -> Option<&LogicalMessage> {
        match self {
            InboundOutcome::Dropped(_) => None,
            InboundOutcome::Progress(message) | InboundOutcome::Complete(message) => Some(message),
        }
    }

    pub fn into_complete(self) -> Option<LogicalMessage> {
        match self {
            InboundOutcome::Complete(message) => Some(message),
            _ => None,
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassemblyStats {
    pub pending: usize,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

// ============================================================================
// BUFFERS
// ============================================================================

/// Partial message. Slot count is fixed by the first frame seen.
#[derive(Debug)]
struct ReassemblyBuffer {
    header: FrameHeader,
    slots: Box<[Option<Vec<u8>>]>,
    received: u8,
    prefix: Option<ScopePrefix>,
    created_at: Instant,
}

impl ReassemblyBuffer {
    fn new(frame: &WireFrame, now: Instant) -> Self {
        Self {
            header: frame.header(),
            slots: vec![None; frame.total_chunks as usize].into_boxed_slice(),
            received: 0,
            prefix: None,
            created_at: now,
        }
    }

    fn total_chunks(&self) -> u8 {
        self.slots.len() as u8
    }

    /// Store the chunk; false if its index was already filled.
    fn store(&mut self, frame: WireFrame) -> bool {
        let index = frame.chunk_index as usize;
        if self.slots[index].is_some() {
            return false;
        }
        if index == 0 {
            self.header = frame.header();
            self.prefix = frame.scope_prefix();
        }
        self.slots[index] = Some(frame.chunk);
        self.received += 1;
        true
    }

    fn is_complete(&self) -> bool {
        self.received == self.total_chunks()
    }

    fn missing_chunks(&self) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u8)
            .collect()
    }

    fn concat(self) -> Vec<u8> {
        self.slots.into_vec().into_iter().flatten().flatten().collect()
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > timeout
    }

    /// Best scope known so far; group ids are only known once chunk 0 is in.
    fn scope(&self) -> ChatScope {
        let kind = self.header.chat_kind;
        match kind {
            ChatKind::Broadcast => ChatScope::broadcast(),
            ChatKind::Direct => ChatScope::direct(self.header.sender),
            ChatKind::Group => ChatScope { kind, id: self.prefix.and_then(|p| p.scope_id) },
        }
    }

    fn placeholder(&self, text: String, status: MessageStatus) -> LogicalMessage {
        LogicalMessage {
            sender: self.header.sender,
            message_id: self.header.message_id,
            scope: self.scope(),
            reply_to: self.prefix.and_then(|p| p.reply_to),
            kind: self.header.message_kind,
            body: MessageBody::text(text),
            status,
            is_self: false,
            chunk_count: self.total_chunks(),
            missing_chunks: self.missing_chunks(),
        }
    }

    fn progress_message(&self) -> LogicalMessage {
        let (received, total) = (self.received, self.total_chunks());
        self.placeholder(
            format!("receiving chunk ({}/{})", received, total),
            MessageStatus::Receiving { received, total },
        )
    }

    fn failed_message(&self) -> LogicalMessage {
        let (received, total) = (self.received, self.total_chunks());
        self.placeholder(
            format!("failed to receive message ({}/{} chunks)", received, total),
            MessageStatus::Failed { received, total },
        )
    }
}

/// Bounded memory of delivered messages, oldest evicted first.
#[derive(Debug)]
struct RecentSet {
    order: VecDeque<BufferKey>,
    members: HashSet<BufferKey>,
    capacity: usize,
}

impl RecentSet {
    fn new(capacity: usize) -> Self {
        Self { order: VecDeque::new(), members: HashSet::new(), capacity }
    }

    fn contains(&self, key: &BufferKey) -> bool {
        self.members.contains(key)
    }

    fn insert(&mut self, key: BufferKey) {
        if self.capacity == 0 || !self.members.insert(key) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

#[derive(Debug)]
struct ReassemblyTable {
    buffers: HashMap<BufferKey, ReassemblyBuffer>,
    recent: RecentSet,
    stats: ReassemblyStats,
}

impl ReassemblyTable {
    fn drop_frame(&mut self, reason: DropReason) -> InboundOutcome {
        self.stats.dropped += 1;
        InboundOutcome::Dropped(reason)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Send and receive paths for one local node.
pub struct Reassembler {
    local_id: NodeId,
    budget: PayloadBudget,
    max_pending: usize,
    ids: IdGenerator,
    secrets: Arc<dyn SecretResolver>,
    table: Mutex<ReassemblyTable>,
}

impl Reassembler {
    pub fn new(local_id: NodeId, secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            local_id,
            budget: PayloadBudget::DEFAULT,
            max_pending: MAX_PENDING_BUFFERS,
            ids: IdGenerator::new(),
            secrets,
            table: Mutex::new(ReassemblyTable {
                buffers: HashMap::new(),
                recent: RecentSet::new(MAX_RETAINED_MESSAGES),
                stats: ReassemblyStats::default(),
            }),
        }
    }

    pub fn with_budget(mut self, budget: PayloadBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_max_retained(self, max_retained: usize) -> Self {
        self.lock_table().recent = RecentSet::new(max_retained);
        self
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn budget(&self) -> PayloadBudget {
        self.budget
    }

    fn lock_table(&self) -> MutexGuard<'_, ReassemblyTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------------

    /// Encode a new message under a fresh message id.
    pub fn prepare_outbound(&self, outbound: &OutboundMessage) -> Result<OutboundBatch> {
        let message_id = self.ids.next_id();
        self.encode_message(outbound.scope, outbound.reply_to, &outbound.body, message_id)
    }

    /// Encode a previously sent message again under its original id.
    pub fn retransmit(&self, message: &LogicalMessage) -> Result<OutboundBatch> {
        if message.sender != self.local_id {
            warn!("Retransmitting message {} authored by {}", message.message_id, message.sender);
        }
        self.encode_message(message.scope, message.reply_to, &message.body, message.message_id)
    }

    fn encode_message(
        &self,
        scope: ChatScope,
        reply_to: Option<ReplyRef>,
        body: &MessageBody,
        message_id: NodeId,
    ) -> Result<OutboundBatch> {
        let scope_id = match (scope.kind.has_scope_id(), scope.id) {
            (false, _) => None,
            (true, Some(id)) => Some(id),
            (true, None) => return Err(ProtocolError::MissingScopeId(scope.kind)),
        };

        let (kind, mut plain) = encode_body(body)?;

        let secret = self.secrets.secret_for(&scope, self.local_id);
        ChatCipher::new(&secret).apply_in_place(&mut plain);

        let prefix = ScopePrefix { scope_id, reply_to };
        let mut stream = BytesMut::with_capacity(prefix.encoded_len() + plain.len());
        prefix.put(&mut stream);
        stream.put_slice(&plain);

        let header = FrameHeader {
            chat_kind: scope.kind,
            is_reply: reply_to.is_some(),
            message_kind: kind,
            sender: self.local_id,
            message_id,
        };
        let frames = fragment_stream(header, &stream, self.budget)?;
        let encoded = frames
            .iter()
            .map(|frame| frame.encode_within(self.budget))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "📤 Prepared {:?} message {} in {} frame(s) ({} stream bytes)",
            scope.kind,
            message_id,
            encoded.len(),
            stream.len()
        );

        Ok(OutboundBatch {
            message: LogicalMessage {
                sender: self.local_id,
                message_id,
                scope,
                reply_to,
                kind,
                body: body.clone(),
                status: MessageStatus::Complete,
                is_self: true,
                chunk_count: encoded.len() as u8,
                missing_chunks: Vec::new(),
            },
            frames: encoded,
        })
    }

    // ------------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------------

    /// Feed one raw advertisement payload.
    pub fn receive(&self, data: &[u8]) -> InboundOutcome {
        match WireFrame::decode(data) {
            Ok(frame) => self.receive_frame(frame),
            Err(e) => {
                trace!("Dropping undecodable frame: {}", e);
                self.lock_table().drop_frame(DropReason::Malformed)
            }
        }
    }

    /// Feed one decoded frame.
    pub fn receive_frame(&self, frame: WireFrame) -> InboundOutcome {
        let mut table = self.lock_table();

        if frame.sender == self.local_id {
            return table.drop_frame(DropReason::SelfEcho);
        }

        let key = (frame.sender, frame.message_id);
        if table.recent.contains(&key) {
            return table.drop_frame(DropReason::AlreadyDelivered);
        }

        if !table.buffers.contains_key(&key) {
            if table.buffers.len() >= self.max_pending {
                warn!("Reassembly table full ({} pending), dropping {}", table.buffers.len(), frame.message_id);
                return table.drop_frame(DropReason::TableFull);
            }
            debug!(
                "New buffer for message {} from {} ({} chunks)",
                frame.message_id, frame.sender, frame.total_chunks
            );
            table.buffers.insert(key, ReassemblyBuffer::new(&frame, Instant::now()));
        }

        let Some(buffer) = table.buffers.get_mut(&key) else {
            return table.drop_frame(DropReason::Malformed);
        };

        if buffer.total_chunks() != frame.total_chunks {
            debug!(
                "Chunk count mismatch for {}: buffer has {}, frame says {}",
                frame.message_id,
                buffer.total_chunks(),
                frame.total_chunks
            );
            return table.drop_frame(DropReason::ChunkCountMismatch);
        }

        let index = frame.chunk_index;
        if !buffer.store(frame) {
            trace!("Duplicate chunk {} for {}", index, key.1);
            return table.drop_frame(DropReason::Duplicate);
        }

        debug!("Stored chunk {}/{} for message {}", index + 1, buffer.total_chunks(), key.1);

        if !buffer.is_complete() {
            return InboundOutcome::Progress(buffer.progress_message());
        }

        let Some(buffer) = table.buffers.remove(&key) else {
            return table.drop_frame(DropReason::Malformed);
        };

        match self.finish(buffer) {
            Some(message) => {
                table.recent.insert(key);
                table.stats.delivered += 1;
                InboundOutcome::Complete(message)
            }
            None => table.drop_frame(DropReason::Malformed),
        }
    }

    /// Strip the prefix, decrypt and decode a complete buffer.
    fn finish(&self, buffer: ReassemblyBuffer) -> Option<LogicalMessage> {
        let header = buffer.header;
        let chunk_count = buffer.total_chunks();
        let stream = buffer.concat();

        let (prefix, ciphertext) = match ScopePrefix::split(header.chat_kind, header.is_reply, &stream) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Discarding message {} from {}: {}", header.message_id, header.sender, e);
                return None;
            }
        };

        let scope = match header.chat_kind {
            ChatKind::Broadcast => ChatScope::broadcast(),
            ChatKind::Group => ChatScope { kind: ChatKind::Group, id: prefix.scope_id },
            ChatKind::Direct => ChatScope::direct(header.sender),
        };

        let secret = self.secrets.secret_for(&scope, header.sender);
        let plain = ChatCipher::new(&secret).apply(ciphertext);
        let body = decode_body(header.message_kind, &plain);

        info!(
            "📨 Received {:?} message {} from {} ({} chunk(s))",
            header.chat_kind, header.message_id, header.sender, chunk_count
        );

        Some(LogicalMessage {
            sender: header.sender,
            message_id: header.message_id,
            scope,
            reply_to: prefix.reply_to,
            kind: header.message_kind,
            body,
            status: MessageStatus::Complete,
            is_self: false,
            chunk_count,
            missing_chunks: Vec::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------------

    /// Remove and report every buffer older than `timeout`.
    pub fn sweep_expired(&self, timeout: Duration) -> Vec<LogicalMessage> {
        self.sweep_expired_at(Instant::now(), timeout)
    }

    /// [`Reassembler::sweep_expired`] against an explicit clock reading.
    pub fn sweep_expired_at(&self, now: Instant, timeout: Duration) -> Vec<LogicalMessage> {
        let mut table = self.lock_table();

        let expired: Vec<BufferKey> = table
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.is_expired(now, timeout))
            .map(|(key, _)| *key)
            .collect();

        let failed: Vec<LogicalMessage> = expired
            .iter()
            .filter_map(|key| table.buffers.remove(key))
            .map(|buffer| buffer.failed_message())
            .collect();

        if !failed.is_empty() {
            table.stats.failed += failed.len() as u64;
            warn!("⏰ {} partial message(s) timed out", failed.len());
        }

        failed
    }

    /// Drop a partial message without reporting it.
    pub fn abandon(&self, sender: NodeId, message_id: NodeId) -> bool {
        self.lock_table().buffers.remove(&(sender, message_id)).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_table().buffers.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        let table = self.lock_table();
        ReassemblyStats { pending: table.buffers.len(), ..table.stats }
    }
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("local_id", &self.local_id)
            .field("budget", &self.budget)
            .field("max_pending", &self.max_pending)
            .finish_non_exhaustive()
    }
}

/// Pick the message kind and produce the plaintext stream for `body`.
fn encode_body(body: &MessageBody) -> Result<(MessageKind, Vec<u8>)> {
    if let Some(reference) = body.text.strip_prefix(LINK_REFERENCE_PREFIX) {
        if body.has_media() {
            warn!("Link reference message carries media, media links dropped");
        }
        return Ok((MessageKind::LinkReference, reference.as_bytes().to_vec()));
    }

    let payload = encode_payload(body)?;
    if payload.literal_text {
        let mut literal = payload.bytes;
        literal.drain(..MARKER_LITERAL.len());
        Ok((MessageKind::LiteralUnicode, literal))
    } else {
        Ok((MessageKind::PlainCompressed, payload.bytes))
    }
}

fn decode_body(kind: MessageKind, plain: &[u8]) -> MessageBody {
    match kind {
        MessageKind::PlainCompressed => parse_payload(plain),
        MessageKind::LiteralUnicode => {
            let mut payload = Vec::with_capacity(MARKER_LITERAL.len() + plain.len());
            payload.extend_from_slice(MARKER_LITERAL);
            payload.extend_from_slice(plain);
            parse_payload(&payload)
        }
        MessageKind::LinkReference => {
            MessageBody::text(format!("{}{}", LINK_REFERENCE_PREFIX, String::from_utf8_lossy(plain)))
        }
    }
}

/// Run the expiry sweep every `interval`, forwarding failed messages to `tx`.
///
/// The task ends when the receiving side of `tx` is dropped.
pub fn spawn_expiry_sweeper(
    engine: Arc<Reassembler>,
    interval: Duration,
    timeout: Duration,
    tx: mpsc::Sender<LogicalMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("🧹 Expiry sweeper started (every {:?}, timeout {:?})", interval, timeout);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }
            for message in engine.sweep_expired(timeout) {
                if tx.send(message).await.is_err() {
                    debug!("Failed-message receiver dropped");
                    return;
                }
            }
        }
        debug!("Expiry sweeper stopped");
    })
}
