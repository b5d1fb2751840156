//! pactnet-discovery
//!
//! Peer discovery: the JSON-persisted static service registry, the
//! Kademlia DHT overlay (authoritative), and the relay for NAT-bound peers.

pub mod dht;
pub mod registry;
pub mod relay;

pub use dht::{DhtConfig, DhtNode, NodeId};
pub use registry::{RegistryStats, ServiceRegistry};
pub use relay::{ForwardOutcome, RelayConfig, RelayMessage, RelayPeer, RelayService, RelayStats};
