//! Encrypted on-disk keystore.
//!
//! One JSON keyfile per entity under the keystore directory. The Ed25519
//! seed is encrypted with AES-256-GCM under a key derived from the password
//! via PBKDF2-SHA256 (600 000 iterations, per-keyfile random salt and
//! nonce). Files are written 0600 inside a 0700 directory; any tampering
//! with ciphertext, salt or nonce makes decryption fail.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use pactnet_core::constants::{KEYSTORE_PBKDF2_ITERATIONS, KEYSTORE_VERSION};
use pactnet_core::types::EntityId;
use pactnet_core::PactError;

use crate::keypair::Keypair;

const SALT_BYTES: usize = 16;
const GCM_NONCE_BYTES: usize = 12;

#[derive(Serialize, Deserialize)]
struct KeystoreFile {
    version: u32,
    entity_id: String,
    /// Ed25519 public key, hex.
    public_key: String,
    /// AES-256-GCM ciphertext of the 32-byte seed, base64.
    encrypted_private_key: String,
    salt: String,
    nonce: String,
    algorithm: String,
    kdf: String,
    kdf_iterations: u32,
    created_at: String,
}

/// Directory of encrypted keyfiles, one per entity.
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Open (creating if needed) the keystore directory with 0700 perms.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PactError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PactError::Persistence(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| PactError::Persistence(e.to_string()))?;
        }
        Ok(Self { dir })
    }

    fn keyfile_path(&self, entity_id: &EntityId) -> PathBuf {
        self.dir.join(format!("{}.json", entity_id))
    }

    pub fn exists(&self, entity_id: &EntityId) -> bool {
        self.keyfile_path(entity_id).exists()
    }

    /// Generate and persist a new keypair. Refuses to overwrite an existing
    /// keyfile and rejects empty passwords.
    pub fn create(&self, entity_id: &EntityId, password: &str) -> Result<Keypair, PactError> {
        if password.is_empty() {
            return Err(PactError::Internal("password cannot be empty".into()));
        }
        let path = self.keyfile_path(entity_id);
        if path.exists() {
            return Err(PactError::Persistence(format!(
                "keyfile already exists for {entity_id}"
            )));
        }

        let keypair = Keypair::generate(entity_id.clone());
        self.write_keyfile(&path, &keypair, password)?;
        tracing::info!(entity = %entity_id, "created keystore entry");
        Ok(keypair)
    }

    /// Decrypt and load the keypair for `entity_id`.
    pub fn load(&self, entity_id: &EntityId, password: &str) -> Result<Keypair, PactError> {
        let path = self.keyfile_path(entity_id);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| PactError::Persistence(format!("keyfile not found for {entity_id}")))?;
        let file: KeystoreFile =
            serde_json::from_str(&raw).map_err(|e| PactError::InvalidJson(e.to_string()))?;

        if file.version != KEYSTORE_VERSION {
            return Err(PactError::InvalidJson(format!(
                "unsupported keystore version {}",
                file.version
            )));
        }

        let b64 = base64::engine::general_purpose::STANDARD;
        let salt = b64
            .decode(&file.salt)
            .map_err(|e| PactError::InvalidJson(format!("salt: {e}")))?;
        let nonce = b64
            .decode(&file.nonce)
            .map_err(|e| PactError::InvalidJson(format!("nonce: {e}")))?;
        let ciphertext = b64
            .decode(&file.encrypted_private_key)
            .map_err(|e| PactError::InvalidJson(format!("ciphertext: {e}")))?;
        if nonce.len() != GCM_NONCE_BYTES {
            return Err(PactError::InvalidJson("bad nonce length".into()));
        }

        let key = derive_key(password, &salt, file.kdf_iterations);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| PactError::Internal("invalid password or corrupted keystore".into()))?;

        let seed: [u8; 32] = plaintext
            .try_into()
            .map_err(|_| PactError::Internal("invalid password or corrupted keystore".into()))?;
        let keypair = Keypair::from_seed(entity_id.clone(), seed);

        // The stored public key must match the decrypted seed.
        if keypair.public_key_hex().as_str() != file.public_key {
            return Err(PactError::Internal(
                "keystore public key mismatch after decrypt".into(),
            ));
        }
        Ok(keypair)
    }

    /// List entity ids that have a keyfile.
    pub fn list(&self) -> Result<Vec<EntityId>, PactError> {
        let mut out = Vec::new();
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| PactError::Persistence(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| PactError::Persistence(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                out.push(EntityId::new(stem));
            }
        }
        out.sort();
        Ok(out)
    }

    fn write_keyfile(
        &self,
        path: &Path,
        keypair: &Keypair,
        password: &str,
    ) -> Result<(), PactError> {
        let mut salt = [0u8; SALT_BYTES];
        let mut nonce = [0u8; GCM_NONCE_BYTES];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

        let key = derive_key(password, &salt, KEYSTORE_PBKDF2_ITERATIONS);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), keypair.seed_bytes().as_slice())
            .map_err(|_| PactError::Internal("keystore encryption failed".into()))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        let file = KeystoreFile {
            version: KEYSTORE_VERSION,
            entity_id: keypair.entity_id.to_string(),
            public_key: keypair.public_key_hex().to_string(),
            encrypted_private_key: b64.encode(ciphertext),
            salt: b64.encode(salt),
            nonce: b64.encode(nonce),
            algorithm: "AES-256-GCM".into(),
            kdf: "PBKDF2-SHA256".into(),
            kdf_iterations: KEYSTORE_PBKDF2_ITERATIONS,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| PactError::Internal(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| PactError::Persistence(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| PactError::Persistence(e.to_string()))?;
        }
        Ok(())
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}
