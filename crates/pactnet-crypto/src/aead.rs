//! Session payload encryption.
//!
//! When end-to-end encryption is enabled for a session, both sides derive a
//! ChaCha20-Poly1305 key from the X25519 shared secret and the session id.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use pactnet_core::types::SessionId;
use pactnet_core::PactError;

use crate::hash::sha256;

const NONCE_BYTES: usize = 12;

/// Symmetric cipher bound to one session.
pub struct SessionCipher {
    cipher: ChaCha20Poly1305,
}

impl SessionCipher {
    /// Derive the session key as SHA-256(shared_secret || session_id bytes).
    pub fn derive(shared_secret: &[u8; 32], session_id: &SessionId) -> Self {
        let mut material = Vec::with_capacity(32 + 16);
        material.extend_from_slice(shared_secret);
        material.extend_from_slice(session_id.as_bytes());
        let key = sha256(&material);
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Encrypt, returning nonce-prefixed ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, PactError> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);
        let ct = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| PactError::Internal("session encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_BYTES + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Decrypt nonce-prefixed ciphertext produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, PactError> {
        if sealed.len() < NONCE_BYTES {
            return Err(PactError::InvalidJson("sealed payload too short".into()));
        }
        let (nonce, ct) = sealed.split_at(NONCE_BYTES);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| PactError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;

    #[test]
    fn seal_open_round_trip() {
        let a = Keypair::generate("a".into());
        let b = Keypair::generate("b".into());
        let session_id = uuid::Uuid::new_v4();

        let secret_a = a.x25519_agree(&b.x25519_public_hex()).unwrap();
        let secret_b = b.x25519_agree(&a.x25519_public_hex()).unwrap();

        let tx = SessionCipher::derive(&secret_a, &session_id);
        let rx = SessionCipher::derive(&secret_b, &session_id);

        let sealed = tx.seal(b"confidential payload").unwrap();
        assert_eq!(rx.open(&sealed).unwrap(), b"confidential payload");
    }

    #[test]
    fn tampering_breaks_open() {
        let a = Keypair::generate("a".into());
        let secret = a.x25519_agree(&a.x25519_public_hex()).unwrap();
        let cipher = SessionCipher::derive(&secret, &uuid::Uuid::new_v4());

        let mut sealed = cipher.seal(b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.open(&sealed).is_err());
    }
}
