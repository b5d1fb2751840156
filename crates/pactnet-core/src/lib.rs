pub mod constants;
pub mod contract;
pub mod error;
pub mod ledger;
pub mod message;
pub mod registry;
pub mod reputation;
pub mod types;

pub use constants::*;
pub use contract::{
    Agreement, Escrow, EscrowCondition, EscrowStatus, Milestone, TaskProposal, TaskQuote,
    Transaction, TransactionState,
};
pub use error::PactError;
pub use ledger::{EntryKind, LedgerEntry, SupplyStats, TaskContract, TaskStatus, Wallet};
pub use message::{ChunkRecord, MessageBody, NackBody, Payload, WireMessage};
pub use registry::{PeerInfo, ServiceEntry};
pub use reputation::{EntityReputation, EvalVerdict, Evaluation, ReputationEvent, ReputationTier};
pub use types::*;
