//! pactnet-proto
//!
//! Pure protocol logic for peer messaging v1.1: envelope signing and
//! validation, replay defense, and chunked transfer. Transport (HTTP) and
//! session state live in their own crates.

pub mod chunk;
pub mod replay;
pub mod signing;

pub use chunk::{ChunkManager, ChunkOutcome, TransferStatus};
pub use replay::ReplayGuard;
pub use signing::{
    build_message, fresh_nonce, refresh_and_sign, record_signing_input, sign_record,
    validate_envelope, verify_envelope, verify_record,
};
