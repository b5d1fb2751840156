use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount in micro-credits (1 CRD = 1_000_000 micro-credits). u64
/// arithmetic is always checked; a wallet balance can never go negative.
pub type Amount = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Per-session message sequence number (monotone, starts at 1).
pub type Sequence = u64;

/// Session identifier (UUID v4), agreed during the handshake.
pub type SessionId = uuid::Uuid;

// ── EntityId ─────────────────────────────────────────────────────────────────

/// Unique participant identifier. Free-form string chosen at registration
/// time (e.g. "agent-alpha-7"); uniqueness is enforced by the registries.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── TransferId ───────────────────────────────────────────────────────────────

/// Identifier of a chunked transfer: 32 hex chars (SHA-256 prefix of
/// sender, recipient and initiation time).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({}…)", &self.0[..self.0.len().min(8)])
    }
}

// ── TaskId ───────────────────────────────────────────────────────────────────

/// Task contract identifier (UUID v4 as string). Keys the locked-funds map.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

// ── Ed25519 key material (hex-encoded on the wire and on disk) ───────────────

/// Ed25519 public key, 32 bytes, hex-encoded in JSON.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyHex(pub String);

impl PublicKeyHex {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<[u8; 32], hex::FromHexError> {
        let v = hex::decode(&self.0)?;
        let mut arr = [0u8; 32];
        if v.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        arr.copy_from_slice(&v);
        Ok(arr)
    }
}

impl fmt::Display for PublicKeyHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublicKeyHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyHex({}…)", &self.0[..self.0.len().min(8)])
    }
}
