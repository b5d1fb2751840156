//! Kademlia overlay: 160-bit SHA-1 node ids, k-bucket routing, UDP framing
//! and the signed peer-record store.

pub mod node;
pub mod node_id;
pub mod routing;
pub mod wire;

pub use node::{DhtConfig, DhtNode};
pub use node_id::NodeId;
pub use routing::{NodeEntry, RoutingTable, UpdateOutcome};
pub use wire::{Datagram, RpcBody, WireNode};
