//! nearchat Core Library
//!
//! Protocol core for chatting over short-range broadcast advertisements:
//! compact identifiers, bit-packed payloads, a per-chat obfuscation cipher,
//! and a frame codec with out-of-order reassembly.

pub mod compression;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod message;
pub mod messaging;
pub mod protocol;

// Re-export important types for easier access
pub use compression::MessageBody;
pub use config::Config;
pub use error::{FrameError, ProtocolError};
pub use identity::{IdGenerator, NodeId, WireId};
pub use message::{ChatScope, LogicalMessage, MessageStatus, OutboundBatch, OutboundMessage, ReplyRef};
pub use messaging::{Keyring, SecretResolver};
pub use protocol::{ChatKind, DropReason, InboundOutcome, MessageKind, PayloadBudget, Reassembler, ReassemblyStats};

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of the failed-message channel handed out by [`NearChatCore::start_sweeper`]
const FAILED_CHANNEL_CAPACITY: usize = 64;

/// Main nearchat core instance for one local node
pub struct NearChatCore {
    config: Config,
    keyring: Arc<Keyring>,
    engine: Arc<Reassembler>,
}

impl NearChatCore {
    /// Create a core for `local_id` with validated configuration
    pub fn new(local_id: NodeId, config: Config) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let keyring = Arc::new(Keyring::new());
        let engine = Reassembler::new(local_id, keyring.clone())
            .with_budget(config.budget())
            .with_max_pending(config.max_pending_buffers)
            .with_max_retained(config.max_retained_messages);

        info!(
            "🔐 nearchat core ready for {} (budget {} bytes, timeout {:?})",
            local_id,
            config.payload_budget,
            config.reassembly_timeout()
        );

        Ok(Self { config, keyring, engine: Arc::new(engine) })
    }

    pub fn local_id(&self) -> NodeId {
        self.engine.local_id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Group and friend keys used by both send and receive paths
    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn engine(&self) -> &Arc<Reassembler> {
        &self.engine
    }

    /// Encode a message into frames ready for advertisement
    pub fn send(&self, outbound: &OutboundMessage) -> error::Result<OutboundBatch> {
        self.engine.prepare_outbound(outbound)
    }

    /// Feed one inbound advertisement payload
    pub fn handle_frame(&self, data: &[u8]) -> InboundOutcome {
        self.engine.receive(data)
    }

    /// Sweep expired partial messages once, using the configured timeout
    pub fn sweep(&self) -> Vec<LogicalMessage> {
        self.engine.sweep_expired(self.config.reassembly_timeout())
    }

    /// Start the periodic expiry sweep. Failed messages arrive on the returned receiver.
    pub fn start_sweeper(&self) -> (JoinHandle<()>, mpsc::Receiver<LogicalMessage>) {
        let (tx, rx) = mpsc::channel(FAILED_CHANNEL_CAPACITY);
        let handle = protocol::spawn_expiry_sweeper(
            self.engine.clone(),
            self.config.cleanup_interval(),
            self.config.reassembly_timeout(),
            tx,
        );
        (handle, rx)
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.engine.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_core_roundtrip() {
        let alice = NearChatCore::new(NodeId::new(1), Config::default()).unwrap();
        let bob = NearChatCore::new(NodeId::new(2), Config::default()).unwrap();

        let batch = alice.send(&OutboundMessage::broadcast(MessageBody::text("hi bob"))).unwrap();
        let mut delivered = None;
        for frame in &batch.frames {
            if let InboundOutcome::Complete(message) = bob.handle_frame(frame) {
                delivered = Some(message);
            }
        }
        assert_eq!(delivered.unwrap().body.text, "hi bob");
        assert_eq!(bob.stats().delivered, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config { max_pending_buffers: 0, ..Config::default() };
        let err = NearChatCore::new(NodeId::new(1), config).err().unwrap();
        assert!(format!("{:#}", err).contains("max_pending_buffers"));
    }

    #[tokio::test]
    async fn test_sweeper_uses_config() {
        let config = Config::default()
            .with_cleanup_interval(Duration::from_millis(10))
            .with_reassembly_timeout(Duration::from_millis(5));
        let alice = NearChatCore::new(NodeId::new(1), config.clone()).unwrap();
        let bob = NearChatCore::new(NodeId::new(2), config).unwrap();

        let text = format!("é{}", "z".repeat(40));
        let batch = alice.send(&OutboundMessage::broadcast(MessageBody::text(text))).unwrap();
        bob.handle_frame(&batch.frames[0]);

        let (handle, mut rx) = bob.start_sweeper();
        let failed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(failed.status, MessageStatus::Failed { received: 1, .. }));
        handle.abort();
    }
}
