//! pactnet-contract
//!
//! The transaction and escrow engine: signed proposal → quote → agreement
//! negotiation, the settlement state machine, and conditionally held funds.

pub mod engine;
pub mod escrow;

pub use engine::ContractEngine;
pub use escrow::{release_percent, EscrowVault};
