//! Per-chat obfuscation cipher.
//!
//! Each byte is XORed with a key derived from the chat password by SHA-256,
//! cycling through the 32 key bytes. This only keeps casual listeners from
//! reading a group or direct conversation: there is no nonce, no integrity
//! check, and the same plaintext always yields the same ciphertext.

use sha2::{Digest, Sha256};
use tracing::trace;
use zeroize::Zeroizing;

use crate::error::{ProtocolError, Result};

pub const KEY_SIZE: usize = 32;

/// Byte-level cipher bound to one password.
///
/// An empty password means "no encryption" and [`ChatCipher::apply`] leaves the
/// data untouched.
#[derive(Clone)]
pub struct ChatCipher {
    key: Option<Zeroizing<[u8; KEY_SIZE]>>,
}

impl ChatCipher {
    pub fn new(password: &str) -> Self {
        if password.is_empty() {
            return Self { key: None };
        }
        let digest = Sha256::digest(password.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&digest);
        Self { key: Some(key) }
    }

    /// Cipher that passes data through unchanged.
    pub fn passthrough() -> Self {
        Self { key: None }
    }

    pub fn is_passthrough(&self) -> bool {
        self.key.is_none()
    }

    /// XOR `data` in place. Applying twice restores the input.
    pub fn apply_in_place(&self, data: &mut [u8]) {
        if let Some(key) = &self.key {
            for (i, byte) in data.iter_mut().enumerate() {
                *byte ^= key[i % KEY_SIZE];
            }
        }
    }

    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_in_place(&mut out);
        out
    }
}

impl std::fmt::Debug for ChatCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCipher")
            .field("keyed", &self.key.is_some())
            .finish()
    }
}

/// Encrypt `text` into a string holding one char (U+0000..=U+00FF) per
/// ciphertext byte.
pub fn encrypt(text: &str, password: &str) -> String {
    let cipher = ChatCipher::new(password);
    if cipher.is_passthrough() {
        return text.to_string();
    }
    cipher.apply(text.as_bytes()).into_iter().map(char::from).collect()
}

/// Inverse of [`encrypt`]. Returns `text` unchanged when it cannot be decrypted.
pub fn decrypt(text: &str, password: &str) -> String {
    match try_decrypt(text, password) {
        Ok(plain) => plain,
        Err(e) => {
            trace!("Returning ciphertext unchanged: {}", e);
            text.to_string()
        }
    }
}

fn try_decrypt(text: &str, password: &str) -> Result<String> {
    let cipher = ChatCipher::new(password);
    if cipher.is_passthrough() {
        return Ok(text.to_string());
    }
    let mut bytes = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| ProtocolError::CipherFailure("char above U+00FF")))
        .collect::<Result<Vec<u8>>>()?;
    cipher.apply_in_place(&mut bytes);
    String::from_utf8(bytes).map_err(|_| ProtocolError::CipherFailure("plaintext is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plain = "meet at the north gate, 7pm";
        let encrypted = encrypt(plain, "k");
        assert_ne!(encrypted, plain);
        assert_eq!(decrypt(&encrypted, "k"), plain);
    }

    #[test]
    fn test_unicode_roundtrip() {
        let plain = "héllo wörld ✓";
        let encrypted = encrypt(plain, "secret");
        assert!(encrypted.chars().all(|c| (c as u32) <= 0xFF));
        assert_eq!(encrypted.chars().count(), plain.len());
        assert_eq!(decrypt(&encrypted, "secret"), plain);
    }

    #[test]
    fn test_empty_password_is_identity() {
        assert_eq!(encrypt("hello", ""), "hello");
        assert_eq!(decrypt("hello", ""), "hello");
        assert_eq!(ChatCipher::new("").apply(b"abc"), b"abc");
    }

    #[test]
    fn test_key_is_sha256_of_password() {
        let cipher = ChatCipher::new("k");
        let zeros = cipher.apply(&[0u8; KEY_SIZE]);
        let digest = Sha256::digest(b"k");
        assert_eq!(zeros.as_slice(), digest.as_slice());
        // Key cycles after 32 bytes
        let longer = cipher.apply(&[0u8; KEY_SIZE + 2]);
        assert_eq!(longer[KEY_SIZE], digest[0]);
        assert_eq!(longer[KEY_SIZE + 1], digest[1]);
    }

    #[test]
    fn test_decrypt_failure_returns_input() {
        // Chars above U+00FF can never come out of encrypt
        assert_eq!(decrypt("✓✓", "k"), "✓✓");
    }

    #[test]
    fn test_wrong_password_does_not_panic() {
        let encrypted = encrypt("some text", "right");
        let _ = decrypt(&encrypted, "wrong");
    }

    #[test]
    fn test_apply_twice_restores() {
        let cipher = ChatCipher::new("pw");
        let data: Vec<u8> = (0..100).collect();
        assert_eq!(cipher.apply(&cipher.apply(&data)), data);
    }
}
