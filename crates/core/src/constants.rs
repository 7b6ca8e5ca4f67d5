//! Global constants for nearchat

use std::time::Duration;

/// Wire frame layout and size limits
pub mod frame {
    /// header byte + sender id + message id + chunk count + chunk index
    pub const HEADER_SIZE: usize = 13;

    /// Advertisement bytes available to one frame by default
    pub const DEFAULT_PAYLOAD_BUDGET: usize = 27;

    /// Smallest budget accepted; leaves 7 chunk bytes per frame
    pub const MIN_PAYLOAD_BUDGET: usize = 20;

    /// Chunk count and index share one byte each
    pub const MAX_CHUNKS: usize = 255;

    /// Scope id length for group and direct chats
    pub const SCOPE_ID_SIZE: usize = 5;

    /// Reply-to sender id + reply-to message id
    pub const REPLY_REF_SIZE: usize = 10;
}

/// Timers driving transmission and reassembly
pub mod timing {
    use super::*;

    /// Pause between consecutive chunk advertisements
    pub const CHUNK_DELAY: Duration = Duration::from_millis(1800);

    /// How long a partial message may wait for its missing chunks
    pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(60_000);

    /// Period of the expiry sweep
    pub const CLEANUP_INTERVAL: Duration = Duration::from_millis(10_000);
}

/// Table bounds
pub mod limits {
    /// Partial messages tracked at once
    pub const MAX_PENDING_BUFFERS: usize = 256;

    /// Delivered (sender, message id) pairs remembered for duplicate suppression
    pub const MAX_RETAINED_MESSAGES: usize = 1000;
}
