//! pactnet-api
//!
//! The node's HTTP surface (peer messaging, marketplace, ledger,
//! reputation), the outbound peer client/sender, and bearer/API-key auth.

pub mod auth;
pub mod client;
pub mod error;
pub mod routes;
pub mod sender;
pub mod server;
pub mod state;

pub use auth::{AuthContext, AuthService};
pub use client::PeerClient;
pub use error::ApiError;
pub use sender::MessageSender;
pub use server::{build_router, serve};
pub use state::{ApiState, NodeStats, PeerRecord};
