//! pactnet-reputation
//!
//! Evaluation-driven reputation ledger with streaks, tiering and bounded
//! history.

pub mod manager;

pub use manager::ReputationLedger;
