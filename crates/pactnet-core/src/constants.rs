//! ─── PactNet Protocol Constants ─────────────────────────────────────────────
//!
//! Peer messaging, session, token-economy and discovery defaults. Values that
//! operators commonly tune (ports, data dir, rate limits) are configuration;
//! everything here is protocol-level.

use crate::types::{Amount, Timestamp};

// ── Protocol versions ────────────────────────────────────────────────────────

/// Canonical peer protocol version. Other versions are rejected.
pub const PROTOCOL_VERSION: &str = "1.1";

/// Legacy protocol version, accepted only on the `/v0.1/message` endpoint
/// (same schema minus session_id/sequence).
pub const LEGACY_PROTOCOL_VERSION: &str = "0.1";

// ── Token units ──────────────────────────────────────────────────────────────

/// 1 CRD expressed in micro-credits. All Amounts are micro-credits.
pub const MICRO_PER_CRD: Amount = 1_000_000;

/// Entity id of the treasury wallet — the sole mint sink.
pub const TREASURY_ENTITY: &str = "treasury";

// ── Messaging ────────────────────────────────────────────────────────────────

/// Random nonce length in bytes (hex-encoded on the wire).
pub const NONCE_BYTES: usize = 16;

/// Maximum allowed skew between a message timestamp and the receiver clock.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Per-sender replay-protection nonce capacity (LRU).
pub const MAX_STORED_NONCES: usize = 1_000;

/// Outbound HTTP retry backoff schedule, in seconds.
pub const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// Outbound message HTTP timeout.
pub const HTTP_TIMEOUT_SECS: u64 = 10;

// ── Chunked transfer ─────────────────────────────────────────────────────────

/// Payloads above this size are fragmented.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Hard cap on a reassembled message.
pub const MAX_TRANSFER_SIZE: usize = 10 * 1024 * 1024;

/// Hex chars of the SHA-256 prefix checksum carried per chunk.
pub const CHUNK_CHECKSUM_HEX_LEN: usize = 32;

/// Idle transfers older than this are garbage-collected.
pub const TRANSFER_EXPIRY_SECS: i64 = 30 * 60;

/// Chunk GC sweep interval.
pub const TRANSFER_SWEEP_INTERVAL_SECS: u64 = 60;

// ── Sessions & sequencing ────────────────────────────────────────────────────

/// Default session lifetime.
pub const SESSION_TTL_SECS: i64 = 3_600;

/// Session manager sweep interval.
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 300;

/// Maximum tolerated sequence gap before accept-and-advance kicks in.
pub const MAX_SEQUENCE_GAP: u64 = 100;

/// Outbound messages retained per session for NACK retransmission.
pub const SEND_HISTORY_CAPACITY: usize = 256;

/// A NACKed gap unresolved for this long moves the session to `Error`.
pub const NACK_TIMEOUT_SECS: i64 = 5;

// ── Contracts ────────────────────────────────────────────────────────────────

/// Default quote validity window.
pub const QUOTE_VALID_SECS: i64 = 24 * 3_600;

/// Default agreement execution deadline.
pub const AGREEMENT_DEADLINE_SECS: i64 = 72 * 3_600;

// ── Reputation ───────────────────────────────────────────────────────────────

/// Score assigned to an entity with no history.
pub const REPUTATION_BASELINE: f64 = 50.0;

/// Streak bonus added per consecutive pass, and its cap.
pub const STREAK_BONUS_PER_STEP: f64 = 0.5;
pub const STREAK_BONUS_CAP: f64 = 3.0;

/// Maximum penalty applied for a delayed delivery.
pub const DELAY_PENALTY_MAX: f64 = 5.0;

/// Historical scores retained per entity (bounded ring).
pub const REPUTATION_HISTORY_CAP: usize = 100;

/// Reputation events retained per entity.
pub const REPUTATION_EVENT_CAP: usize = 200;

// ── Discovery: static registry ───────────────────────────────────────────────

/// A registry entry with a heartbeat within this window is alive.
pub const REGISTRY_ALIVE_SECS: i64 = 60;

/// Entries older than this are removed by cleanup.
pub const REGISTRY_STALE_SECS: i64 = 120;

// ── Discovery: DHT ───────────────────────────────────────────────────────────

/// Kademlia bucket size.
pub const DHT_K: usize = 20;

/// Lookup parallelism.
pub const DHT_ALPHA: usize = 3;

/// Node id length (160-bit SHA-1).
pub const DHT_NODE_ID_BYTES: usize = 20;

/// Stored value lifetime.
pub const DHT_VALUE_TTL_SECS: i64 = 3_600;

/// Periodic republish interval for locally owned values.
pub const DHT_REPUBLISH_INTERVAL_SECS: u64 = 600;

/// DHT value transfer timeout.
pub const DHT_VALUE_TIMEOUT_SECS: u64 = 30;

/// Datagram magic prefix (4 bytes) followed by a 12-byte transaction id.
pub const DHT_MAGIC: [u8; 4] = *b"PNDT";
pub const DHT_TXID_BYTES: usize = 12;

// ── Discovery: relay ─────────────────────────────────────────────────────────

/// Expected peer heartbeat interval.
pub const RELAY_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Peers silent for longer than this are evicted.
pub const RELAY_PEER_TIMEOUT_SECS: i64 = 300;

/// Default relayed-message TTL.
pub const RELAY_MESSAGE_TTL_SECS: i64 = 300;

/// Maximum relay hops before a message is dropped.
pub const RELAY_MAX_HOPS: u32 = 5;

/// Per-peer forwarding rate limit (messages per minute).
pub const RELAY_RATE_LIMIT_PER_MIN: u32 = 100;

/// Queued messages retained per offline recipient.
pub const RELAY_QUEUE_CAPACITY: usize = 100;

// ── Keystore ─────────────────────────────────────────────────────────────────

/// PBKDF2-SHA256 iteration count for keystore encryption keys.
pub const KEYSTORE_PBKDF2_ITERATIONS: u32 = 600_000;

/// Keystore file format version.
pub const KEYSTORE_VERSION: u32 = 1;

// ── Persistence ──────────────────────────────────────────────────────────────

/// Persisted JSON document format version.
pub const STORE_VERSION: u32 = 1;

/// In-process retries for a failed persistence write.
pub const PERSIST_RETRY_COUNT: u32 = 3;

/// Offline-queue messages older than this are purged.
pub const OFFLINE_QUEUE_MAX_AGE_SECS: Timestamp = 7 * 24 * 3_600;
