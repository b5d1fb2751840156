//! pactnet-ledger
//!
//! The token economy: atomic wallet operations, task-locked funds,
//! treasury mint/burn with supply accounting, and the balance monitor.

pub mod economy;
pub mod mint;
pub mod monitor;

pub use economy::TokenEconomy;
pub use mint::{MintRecord, REVIEW_REWARD};
pub use monitor::{Alert, AlertLevel, EconomyMonitor, MonitorConfig};
