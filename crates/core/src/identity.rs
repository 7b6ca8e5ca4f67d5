//! 40-bit identifiers and their two textual forms.
//!
//! Sender and message identifiers are the low 40 bits of a millisecond
//! timestamp. They are shown to people as an 8-character display id over a
//! 32-symbol alphabet and travel on the wire as 5 raw bytes.
//!
//! Identifiers are self-asserted and only collide probabilistically; nothing
//! here tries to make them globally unique.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub const ID_BITS: u32 = 40;
pub const ID_MASK: u64 = (1 << ID_BITS) - 1;
pub const WIRE_ID_LEN: usize = 5;
pub const DISPLAY_ID_LEN: usize = 8;

/// 32 symbols, 5 bits each. Index 0 is also what unknown characters decode to.
const DISPLAY_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ123456";

/// How far in the future a reconstructed timestamp may land before we assume
/// the 40-bit counter wrapped since the id was minted.
const FUTURE_TOLERANCE_MS: i64 = 1000;

/// Label format used next to chat bubbles.
const TIMESTAMP_FORMAT: &str = "%I:%M:%S %p | %d-%m-%Y";

// ============================================================================
// NUMERIC IDENTIFIER
// ============================================================================

/// A 40-bit identifier. Serialized as its display form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NodeId(u64);

impl NodeId {
    /// Keep the low 40 bits of `value`.
    pub const fn new(value: u64) -> Self {
        Self(value & ID_MASK)
    }

    /// Identifier minted from the current wall clock.
    pub fn now() -> Self {
        Self::new(current_timestamp())
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// 8 characters, most significant 5-bit group first.
    pub fn to_display_id(self) -> String {
        (0..DISPLAY_ID_LEN)
            .rev()
            .map(|group| {
                let index = (self.0 >> (group * 5)) & 0x1F;
                DISPLAY_ALPHABET[index as usize] as char
            })
            .collect()
    }

    /// Lenient inverse of [`NodeId::to_display_id`].
    ///
    /// Characters outside the alphabet count as symbol 0 and any input that is
    /// not exactly 8 characters long decodes to 0. This never validates.
    pub fn from_display_id(display: &str) -> Self {
        if display.chars().count() != DISPLAY_ID_LEN {
            return Self(0);
        }
        let value = display.chars().fold(0u64, |acc, c| {
            let index = DISPLAY_ALPHABET
                .iter()
                .position(|&symbol| symbol as char == c)
                .unwrap_or(0) as u64;
            (acc << 5) | index
        });
        Self::new(value)
    }

    /// 5 bytes, most significant byte first.
    pub fn to_wire(self) -> WireId {
        let bytes = self.0.to_be_bytes();
        let mut wire = [0u8; WIRE_ID_LEN];
        wire.copy_from_slice(&bytes[8 - WIRE_ID_LEN..]);
        WireId(wire)
    }

    pub fn from_wire(wire: WireId) -> Self {
        let value = wire.0.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        Self::new(value)
    }

    /// Best-effort full millisecond timestamp for an id observed at `now_ms`.
    ///
    /// Approximate and for display only: never order or deduplicate on it.
    pub fn reconstruct_timestamp_ms(self, now_ms: i64) -> i64 {
        let high = now_ms & !(ID_MASK as i64);
        let candidate = high | self.0 as i64;
        if candidate > now_ms + FUTURE_TOLERANCE_MS {
            candidate - (1i64 << ID_BITS)
        } else {
            candidate
        }
    }

    /// Reconstructed send time relative to the current clock.
    pub fn reconstruct_datetime(self) -> DateTime<Utc> {
        let ms = self.reconstruct_timestamp_ms(Utc::now().timestamp_millis());
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_id())
    }
}

impl From<String> for NodeId {
    fn from(display: String) -> Self {
        Self::from_display_id(&display)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_display_id()
    }
}

// ============================================================================
// WIRE IDENTIFIER
// ============================================================================

/// The 5-byte on-air form of a [`NodeId`]. Also used for 5-byte scope ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WireId(pub [u8; WIRE_ID_LEN]);

impl WireId {
    pub const fn new(bytes: [u8; WIRE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Read a wire id from the first 5 bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; WIRE_ID_LEN] = bytes.get(..WIRE_ID_LEN)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Scope id for a textual group id: first 5 bytes, space padded.
    pub fn from_label(label: &str) -> Self {
        let mut raw = [b' '; WIRE_ID_LEN];
        for (slot, b) in raw.iter_mut().zip(label.bytes()) {
            *slot = b;
        }
        Self(raw)
    }

    /// One char per byte, the form group ids take when used as a fallback secret.
    pub fn to_label(&self) -> String {
        self.0.iter().map(|&b| b as char).collect::<String>().trim_end().to_string()
    }

    pub fn as_bytes(&self) -> &[u8; WIRE_ID_LEN] {
        &self.0
    }

    pub fn to_node_id(self) -> NodeId {
        NodeId::from_wire(self)
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl From<NodeId> for WireId {
    fn from(id: NodeId) -> Self {
        id.to_wire()
    }
}

// ============================================================================
// FRESH IDENTIFIERS
// ============================================================================

/// Hands out message ids from the clock, strictly increasing per generator.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> NodeId {
        let now = current_timestamp() & ID_MASK;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if now > prev { now } else { (prev + 1) & ID_MASK };
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return NodeId(candidate),
                Err(actual) => prev = actual,
            }
        }
    }
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Get current timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// `hh:mm:ss AM | dd-MM-yyyy | 3C` label for a message and its chunk count.
pub fn format_timestamp(message_id: NodeId, chunk_count: u8) -> String {
    let ms = message_id.reconstruct_timestamp_ms(Utc::now().timestamp_millis());
    let base = match Local.timestamp_millis_opt(ms).single() {
        Some(time) => time.format(TIMESTAMP_FORMAT).to_string(),
        None => "--:--:--".to_string(),
    };
    format!("{} | {}C", base, chunk_count)
}
