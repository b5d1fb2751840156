use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pactnet_core::types::{EntityId, PublicKeyHex};
use pactnet_core::PactError;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::hash::sha256;

/// A PactNet identity: Ed25519 signing keypair with a deterministically
/// derived X25519 keypair for session key agreement.
///
/// The 32-byte seed is held in a `Zeroizing` buffer and wiped on drop.
pub struct Keypair {
    pub entity_id: EntityId,
    seed: Zeroizing<[u8; 32]>,
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh Ed25519 keypair for `entity_id`.
    pub fn generate(entity_id: EntityId) -> Self {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut seed);
        Self::from_seed(entity_id, seed)
    }

    /// Restore a keypair from its 32-byte seed (e.g. decrypted keystore).
    pub fn from_seed(entity_id: EntityId, seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        Self {
            entity_id,
            seed: Zeroizing::new(seed),
            signing,
        }
    }

    pub fn seed_bytes(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Hex-encoded Ed25519 public key.
    pub fn public_key_hex(&self) -> PublicKeyHex {
        PublicKeyHex(hex::encode(self.signing.verifying_key().to_bytes()))
    }

    /// Sign SHA-256(message) and return the base64 signature. All PactNet
    /// envelopes and contract records sign the digest, not the raw bytes.
    pub fn sign_digest_b64(&self, message: &[u8]) -> String {
        use base64::Engine;
        let digest = sha256(message);
        let sig = self.signing.sign(&digest);
        base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())
    }

    /// X25519 secret derived from the Ed25519 seed (first 32 bytes of
    /// SHA-512(seed); the scalar is clamped by the X25519 implementation).
    pub fn x25519_secret(&self) -> x25519_dalek::StaticSecret {
        let mut hasher = Sha512::new();
        hasher.update(self.seed.as_slice());
        let wide: [u8; 64] = hasher.finalize().into();
        let mut scalar = [0u8; 32];
        scalar.copy_from_slice(&wide[..32]);
        x25519_dalek::StaticSecret::from(scalar)
    }

    /// Hex-encoded X25519 public key, advertised in session handshakes.
    pub fn x25519_public_hex(&self) -> String {
        let public = x25519_dalek::PublicKey::from(&self.x25519_secret());
        hex::encode(public.to_bytes())
    }

    /// X25519 shared secret with a peer's hex-encoded X25519 public key.
    pub fn x25519_agree(&self, peer_public_hex: &str) -> Result<[u8; 32], PactError> {
        let bytes = hex::decode(peer_public_hex)
            .map_err(|_| PactError::InvalidJson("bad x25519 public key".into()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PactError::InvalidJson("bad x25519 public key length".into()))?;
        let peer = x25519_dalek::PublicKey::from(arr);
        Ok(*self.x25519_secret().diffie_hellman(&peer).as_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair {{ entity_id: {:?} }}", self.entity_id)
    }
}

/// Verify a base64 Ed25519 signature over SHA-256(message) against a
/// hex-encoded public key.
pub fn verify_digest_b64(
    public_key_hex: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), PactError> {
    use base64::Engine;

    let key_bytes = hex::decode(public_key_hex).map_err(|_| PactError::InvalidSignature)?;
    let key_arr: [u8; 32] = key_bytes.try_into().map_err(|_| PactError::InvalidSignature)?;
    let verifying = VerifyingKey::from_bytes(&key_arr).map_err(|_| PactError::InvalidSignature)?;

    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| PactError::InvalidSignature)?;
    let sig_arr: [u8; 64] = sig_bytes.try_into().map_err(|_| PactError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_arr);

    let digest = sha256(message);
    verifying
        .verify(&digest, &signature)
        .map_err(|_| PactError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = Keypair::generate("alice".into());
        let sig = kp.sign_digest_b64(b"payload");
        verify_digest_b64(kp.public_key_hex().as_str(), b"payload", &sig).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let kp = Keypair::generate("alice".into());
        let sig = kp.sign_digest_b64(b"payload");
        let err = verify_digest_b64(kp.public_key_hex().as_str(), b"payl0ad", &sig).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp = Keypair::generate("alice".into());
        let other = Keypair::generate("mallory".into());
        let sig = kp.sign_digest_b64(b"payload");
        assert!(verify_digest_b64(other.public_key_hex().as_str(), b"payload", &sig).is_err());
    }

    #[test]
    fn x25519_agreement_is_symmetric() {
        let a = Keypair::generate("a".into());
        let b = Keypair::generate("b".into());
        let ab = a.x25519_agree(&b.x25519_public_hex()).unwrap();
        let ba = b.x25519_agree(&a.x25519_public_hex()).unwrap();
        assert_eq!(ab, ba);
        assert_ne!(ab, [0u8; 32]);
    }

    #[test]
    fn seed_restores_identical_keys() {
        let kp = Keypair::generate("a".into());
        let restored = Keypair::from_seed("a".into(), *kp.seed_bytes());
        assert_eq!(kp.public_key_hex(), restored.public_key_hex());
        assert_eq!(kp.x25519_public_hex(), restored.x25519_public_hex());
    }
}
