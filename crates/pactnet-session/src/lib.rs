//! pactnet-session
//!
//! UUID-keyed secure sessions with strict state machines, sequence-number
//! ordering, gap detection and NACK-based retransmission bookkeeping.

pub mod manager;
pub mod sequence;
pub mod session;

pub use manager::{SessionConfig, SessionManager, SessionStats, SessionSummary};
pub use sequence::{ReceiveState, SendHistory, SeqOutcome};
pub use session::{Session, SessionState};
