//! Per-conversation secret lookup
//!
//! Group chats fall back to the group id itself when no key was set and
//! direct chats fall back to the sending node's display id, so two nodes
//! that never exchanged a key still read each other.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;
use zeroize::Zeroizing;

use crate::identity::{NodeId, WireId};
use crate::message::ChatScope;
use crate::protocol::ChatKind;

/// Resolves the cipher password for a conversation.
pub trait SecretResolver: Send + Sync {
    /// `scope` names the conversation (for direct chats, the peer) and
    /// `sender` the node that wrote the message.
    fn secret_for(&self, scope: &ChatScope, sender: NodeId) -> String;
}

/// In-memory group and friend keys.
#[derive(Default)]
pub struct Keyring {
    group_keys: RwLock<HashMap<WireId, Zeroizing<String>>>,
    friend_keys: RwLock<HashMap<NodeId, Zeroizing<String>>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_group_key(&self, group_id: &str, key: &str) {
        let id = WireId::from_label(group_id);
        let mut keys = self.group_keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(id, Zeroizing::new(key.to_string()));
        debug!("Stored key for group {}", group_id);
    }

    pub fn remove_group_key(&self, group_id: &str) -> bool {
        let id = WireId::from_label(group_id);
        let mut keys = self.group_keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(&id).is_some()
    }

    pub fn set_friend_key(&self, friend: NodeId, key: &str) {
        let mut keys = self.friend_keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(friend, Zeroizing::new(key.to_string()));
        debug!("Stored key for friend {}", friend);
    }

    pub fn remove_friend_key(&self, friend: NodeId) -> bool {
        let mut keys = self.friend_keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(&friend).is_some()
    }

    fn group_key(&self, id: &WireId) -> Option<String> {
        let keys = self.group_keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(id).filter(|k| !k.is_empty()).map(|k| k.as_str().to_owned())
    }

    fn friend_key(&self, friend: NodeId) -> Option<String> {
        let keys = self.friend_keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(&friend).filter(|k| !k.is_empty()).map(|k| k.as_str().to_owned())
    }
}

impl SecretResolver for Keyring {
    fn secret_for(&self, scope: &ChatScope, sender: NodeId) -> String {
        match (scope.kind, scope.id) {
            (ChatKind::Broadcast, _) | (_, None) => String::new(),
            (ChatKind::Group, Some(id)) => self.group_key(&id).unwrap_or_else(|| id.to_label()),
            (ChatKind::Direct, Some(peer)) => self
                .friend_key(peer.to_node_id())
                .unwrap_or_else(|| sender.to_display_id()),
        }
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups = self.group_keys.read().map(|k| k.len()).unwrap_or(0);
        let friends = self.friend_keys.read().map(|k| k.len()).unwrap_or(0);
        f.debug_struct("Keyring")
            .field("group_keys", &groups)
            .field("friend_keys", &friends)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_has_no_secret() {
        let keyring = Keyring::new();
        assert_eq!(keyring.secret_for(&ChatScope::broadcast(), NodeId::new(1)), "");
    }

    #[test]
    fn test_group_falls_back_to_group_id() {
        let keyring = Keyring::new();
        let scope = ChatScope::group("hike");
        assert_eq!(keyring.secret_for(&scope, NodeId::new(1)), "hike");

        keyring.set_group_key("hike", "trail-mix");
        assert_eq!(keyring.secret_for(&scope, NodeId::new(1)), "trail-mix");

        assert!(keyring.remove_group_key("hike"));
        assert_eq!(keyring.secret_for(&scope, NodeId::new(1)), "hike");
    }

    #[test]
    fn test_empty_group_key_counts_as_unset() {
        let keyring = Keyring::new();
        keyring.set_group_key("club", "");
        assert_eq!(keyring.secret_for(&ChatScope::group("club"), NodeId::new(9)), "club");
    }

    #[test]
    fn test_direct_falls_back_to_sender_display_id() {
        let keyring = Keyring::new();
        let alice = NodeId::new(0xA11CE);
        let bob = NodeId::new(0xB0B);

        // Alice writing to Bob and Bob reading from Alice agree on the secret
        let sending = keyring.secret_for(&ChatScope::direct(bob), alice);
        let receiving = keyring.secret_for(&ChatScope::direct(alice), alice);
        assert_eq!(sending, alice.to_display_id());
        assert_eq!(sending, receiving);

        keyring.set_friend_key(bob, "shared");
        assert_eq!(keyring.secret_for(&ChatScope::direct(bob), alice), "shared");
    }
}
