//! Chunked message transfer: fragmentation and reassembly.
//!
//! Payloads over the chunk threshold are announced with a `chunk_init`
//! message and shipped as `chunk` messages. Chunks may arrive in any order;
//! reassembly reads the chunk map in ascending index order. A chunk for a
//! transfer that was never initialized fails with `UNKNOWN_TRANSFER`, and a
//! reassembled message may never exceed the 10 MiB ceiling.

use base64::Engine;
use std::collections::{BTreeMap, HashMap};

use pactnet_core::constants::{
    CHUNK_CHECKSUM_HEX_LEN, DEFAULT_CHUNK_SIZE, MAX_TRANSFER_SIZE, TRANSFER_EXPIRY_SECS,
};
use pactnet_core::message::{ChunkInitBody, ChunkRecord};
use pactnet_core::types::{EntityId, Timestamp, TransferId};
use pactnet_core::PactError;
use pactnet_crypto::sha256_prefix_hex;

// ── Transfer state ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
}

/// Reassembly state for one inbound transfer.
pub struct TransferState {
    pub transfer_id: TransferId,
    pub sender: EntityId,
    pub recipient: EntityId,
    /// msg_type of the reassembled message.
    pub msg_type: String,
    pub total_chunks: u32,
    pub total_size: u64,
    chunks: BTreeMap<u32, Vec<u8>>,
    received_bytes: usize,
    pub last_activity: Timestamp,
    pub status: TransferStatus,
}

impl TransferState {
    pub fn received_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.total_chunks
    }

    /// Concatenate chunks in ascending index order.
    fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.received_bytes);
        for data in self.chunks.values() {
            out.extend_from_slice(data);
        }
        out
    }
}

/// Outcome of accepting one chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Chunk stored; more outstanding.
    Progress { received: u32, total: u32 },
    /// All chunks arrived: the reassembled bytes plus the original
    /// message type announced at init.
    Complete { msg_type: String, bytes: Vec<u8> },
    /// Checksum mismatch: the chunk was dropped and should be NACKed.
    BadChecksum { chunk_index: u32 },
    /// Index already held; ignored.
    Duplicate,
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Owns all in-flight transfers. Callers wrap it in their own mutex; every
/// operation is a plain `&mut self` mutation.
pub struct ChunkManager {
    chunk_size: usize,
    max_transfer_size: usize,
    expiry_secs: i64,
    transfers: HashMap<TransferId, TransferState>,
}

impl Default for ChunkManager {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, MAX_TRANSFER_SIZE, TRANSFER_EXPIRY_SECS)
    }
}

impl ChunkManager {
    pub fn new(chunk_size: usize, max_transfer_size: usize, expiry_secs: i64) -> Self {
        Self {
            chunk_size,
            max_transfer_size,
            expiry_secs,
            transfers: HashMap::new(),
        }
    }

    /// Whether a payload of `len` bytes needs fragmentation.
    pub fn needs_chunking(&self, len: usize) -> bool {
        len > self.chunk_size
    }

    /// Fragment `payload` for sending. Returns the init announcement plus the
    /// chunk records in index order.
    pub fn split(
        &self,
        sender: &EntityId,
        recipient: &EntityId,
        msg_type: &str,
        payload: &[u8],
    ) -> Result<(ChunkInitBody, Vec<ChunkRecord>), PactError> {
        if payload.len() > self.max_transfer_size {
            return Err(PactError::MessageTooLarge {
                size: payload.len(),
                max: self.max_transfer_size,
            });
        }

        let transfer_id = TransferId(sha256_prefix_hex(
            format!("{sender}:{recipient}:{}", uuid::Uuid::new_v4()).as_bytes(),
            32,
        ));
        // An empty payload still ships as one (empty) chunk.
        let pieces: Vec<&[u8]> = if payload.is_empty() {
            vec![&[]]
        } else {
            payload.chunks(self.chunk_size).collect()
        };
        let total_chunks = pieces.len() as u32;

        let b64 = base64::engine::general_purpose::STANDARD;
        let mut chunks = Vec::with_capacity(total_chunks as usize);
        for (i, piece) in pieces.into_iter().enumerate() {
            chunks.push(ChunkRecord {
                transfer_id: transfer_id.clone(),
                chunk_index: i as u32,
                total_chunks,
                data: b64.encode(piece),
                checksum: sha256_prefix_hex(piece, CHUNK_CHECKSUM_HEX_LEN),
            });
        }

        let init = ChunkInitBody {
            transfer_id,
            total_chunks,
            total_size: payload.len() as u64,
            msg_type: msg_type.to_string(),
            metadata: Default::default(),
        };
        Ok((init, chunks))
    }

    /// Start tracking an announced inbound transfer.
    pub fn init_transfer(
        &mut self,
        init: &ChunkInitBody,
        sender: &EntityId,
        recipient: &EntityId,
        now: Timestamp,
    ) -> Result<(), PactError> {
        if init.total_size as usize > self.max_transfer_size {
            return Err(PactError::MessageTooLarge {
                size: init.total_size as usize,
                max: self.max_transfer_size,
            });
        }
        if init.total_chunks == 0 {
            return Err(PactError::InvalidJson("transfer with zero chunks".into()));
        }
        self.transfers.insert(
            init.transfer_id.clone(),
            TransferState {
                transfer_id: init.transfer_id.clone(),
                sender: sender.clone(),
                recipient: recipient.clone(),
                msg_type: init.msg_type.clone(),
                total_chunks: init.total_chunks,
                total_size: init.total_size,
                chunks: BTreeMap::new(),
                received_bytes: 0,
                last_activity: now,
                status: TransferStatus::Pending,
            },
        );
        Ok(())
    }

    /// Accept one chunk. The transfer must have been initialized.
    pub fn receive_chunk(
        &mut self,
        chunk: &ChunkRecord,
        now: Timestamp,
    ) -> Result<ChunkOutcome, PactError> {
        let state = self
            .transfers
            .get_mut(&chunk.transfer_id)
            .ok_or_else(|| PactError::UnknownTransfer(chunk.transfer_id.to_string()))?;

        if chunk.chunk_index >= state.total_chunks {
            return Err(PactError::InvalidJson(format!(
                "chunk index {} out of range ({} chunks)",
                chunk.chunk_index, state.total_chunks
            )));
        }

        let data = chunk.data_bytes()?;
        if sha256_prefix_hex(&data, CHUNK_CHECKSUM_HEX_LEN) != chunk.checksum {
            tracing::warn!(
                transfer = %chunk.transfer_id,
                index = chunk.chunk_index,
                "chunk checksum mismatch, dropping"
            );
            return Ok(ChunkOutcome::BadChecksum {
                chunk_index: chunk.chunk_index,
            });
        }

        state.last_activity = now;
        if state.chunks.contains_key(&chunk.chunk_index) {
            return Ok(ChunkOutcome::Duplicate);
        }

        if state.received_bytes + data.len() > self.max_transfer_size {
            let id = chunk.transfer_id.clone();
            self.transfers.remove(&id);
            return Err(PactError::MessageTooLarge {
                size: self.max_transfer_size + 1,
                max: self.max_transfer_size,
            });
        }

        state.received_bytes += data.len();
        state.chunks.insert(chunk.chunk_index, data);
        state.status = TransferStatus::InProgress;

        if state.is_complete() {
            state.status = TransferStatus::Completed;
            let bytes = state.assemble();
            let msg_type = state.msg_type.clone();
            let id = chunk.transfer_id.clone();
            self.transfers.remove(&id);
            return Ok(ChunkOutcome::Complete { msg_type, bytes });
        }

        Ok(ChunkOutcome::Progress {
            received: state.received_chunks(),
            total: state.total_chunks,
        })
    }

    pub fn get(&self, transfer_id: &TransferId) -> Option<&TransferState> {
        self.transfers.get(transfer_id)
    }

    /// Drop transfers idle past the expiry window. Returns how many.
    pub fn sweep_expired(&mut self, now: Timestamp) -> usize {
        let expiry = self.expiry_secs;
        let before = self.transfers.len();
        self.transfers
            .retain(|_, t| now - t.last_activity <= expiry);
        before - self.transfers.len()
    }

    pub fn active_transfers(&self) -> usize {
        self.transfers.len()
    }
}
