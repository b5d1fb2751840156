pub mod aead;
pub mod hash;
pub mod keypair;
pub mod keystore;

pub use aead::SessionCipher;
pub use hash::{canonical_json, sha1_digest, sha256, sha256_hex, sha256_prefix_hex};
pub use keypair::{verify_digest_b64, Keypair};
pub use keystore::Keystore;
