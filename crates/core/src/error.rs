//! Error types for the nearchat core.
//!
//! Frame-level problems are grouped under [`FrameError`] so the reassembly
//! engine can drop broadcast noise with one match arm. Everything else is a
//! variant of [`ProtocolError`].

use thiserror::Error;

use crate::protocol::ChatKind;

/// Top-level error type for every fallible operation in the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Inbound bytes do not form a valid wire frame
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// Text contains a character none of the compression alphabets cover.
    /// Callers fall back to the literal representation.
    #[error("unsupported character {0:?} for compression")]
    UnsupportedCharacter(char),

    /// Outbound message needs more chunks than the count byte can express
    #[error("message needs {chunks} chunks (max {max})")]
    MessageTooLarge { chunks: usize, max: usize },

    /// Encoded frame does not fit the configured payload budget
    #[error("frame size {size} exceeds payload budget {budget}")]
    FrameTooLarge { size: usize, budget: usize },

    /// Group and direct messages must name the scope they belong to
    #[error("{0:?} chat requires a scope id")]
    MissingScopeId(ChatKind),

    /// A payload segment cannot be written without containing a segment marker
    #[error("{0} would contain a payload marker")]
    MarkerCollision(&'static str),

    /// Ciphertext could not be mapped back to text
    #[error("cipher failure: {0}")]
    CipherFailure(&'static str),
}

/// Wire frame validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame is shorter than the fixed header
    #[error("frame too short: need at least {required} bytes, got {actual}")]
    TooShort { required: usize, actual: usize },

    /// Chat kind bits hold a reserved value
    #[error("reserved chat kind id {0}")]
    ReservedChatKind(u8),

    /// Message kind nibble holds an unassigned value
    #[error("unknown message kind id {0}")]
    UnknownMessageKind(u8),

    /// Total chunk count of zero
    #[error("total chunk count is zero")]
    ZeroChunkCount,

    /// Chunk index is not below the total chunk count
    #[error("chunk index {index} >= total chunks {total}")]
    ChunkIndexOutOfRange { index: u8, total: u8 },

    /// Reassembled stream is too short for its scope/reply prefix
    #[error("stream too short for prefix: need {required} bytes, got {actual}")]
    TruncatedPrefix { required: usize, actual: usize },
}

/// Type alias for Result with our error type
pub type Result<T> = std::result::Result<T, ProtocolError>;
