//! DHT datagram framing.
//!
//! Every UDP datagram is a 4-byte magic, a 12-byte transaction id, then a
//! JSON RPC body. The transaction id matches replies to in-flight requests
//! (STUN-style framing, which also lets the socket coexist with STUN-based
//! NAT probing).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use pactnet_core::constants::{DHT_MAGIC, DHT_TXID_BYTES};
use pactnet_core::registry::PeerInfo;
use pactnet_core::types::EntityId;
use pactnet_core::PactError;

pub type TxId = [u8; DHT_TXID_BYTES];

/// Compact node descriptor exchanged in FIND_NODE/FIND_VALUE replies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireNode {
    pub node_id: String,
    pub entity_id: EntityId,
    pub addr: SocketAddr,
}

/// RPC bodies mirroring Kademlia's four verbs plus their replies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "rpc", rename_all = "snake_case")]
pub enum RpcBody {
    Ping {
        from: WireNode,
    },
    Pong {
        from: WireNode,
    },
    Store {
        from: WireNode,
        key: String,
        value: PeerInfo,
    },
    StoreAck {
        key: String,
    },
    FindNode {
        from: WireNode,
        target: String,
    },
    FindNodeReply {
        nodes: Vec<WireNode>,
    },
    FindValue {
        from: WireNode,
        key: String,
    },
    FindValueReply {
        value: Option<PeerInfo>,
        nodes: Vec<WireNode>,
    },
}

/// One framed datagram.
#[derive(Clone, Debug)]
pub struct Datagram {
    pub txid: TxId,
    pub body: RpcBody,
}

impl Datagram {
    pub fn new(txid: TxId, body: RpcBody) -> Self {
        Self { txid, body }
    }

    pub fn fresh(body: RpcBody) -> Self {
        let mut txid = [0u8; DHT_TXID_BYTES];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut txid);
        Self { txid, body }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = serde_json::to_vec(&self.body).expect("rpc body serialization is infallible");
        let mut out = Vec::with_capacity(4 + DHT_TXID_BYTES + body.len());
        out.extend_from_slice(&DHT_MAGIC);
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PactError> {
        if bytes.len() < 4 + DHT_TXID_BYTES {
            return Err(PactError::InvalidJson("datagram too short".into()));
        }
        if bytes[..4] != DHT_MAGIC {
            return Err(PactError::InvalidJson("bad datagram magic".into()));
        }
        let mut txid = [0u8; DHT_TXID_BYTES];
        txid.copy_from_slice(&bytes[4..4 + DHT_TXID_BYTES]);
        let body = serde_json::from_slice(&bytes[4 + DHT_TXID_BYTES..])
            .map_err(|e| PactError::InvalidJson(e.to_string()))?;
        Ok(Self { txid, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_core::types::PublicKeyHex;

    fn node(name: &str) -> WireNode {
        WireNode {
            node_id: "ab".repeat(20),
            entity_id: name.into(),
            addr: "127.0.0.1:4000".parse().unwrap(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let datagram = Datagram::fresh(RpcBody::FindNode {
            from: node("a"),
            target: "cd".repeat(20),
        });
        let decoded = Datagram::decode(&datagram.encode()).unwrap();
        assert_eq!(decoded.txid, datagram.txid);
        match decoded.body {
            RpcBody::FindNode { target, .. } => assert_eq!(target, "cd".repeat(20)),
            other => panic!("wrong body {other:?}"),
        }
    }

    #[test]
    fn store_carries_peer_info() {
        let info = PeerInfo {
            peer_id: "peer".into(),
            public_key: PublicKeyHex("00".repeat(32)),
            endpoint: "127.0.0.1:8000".into(),
            capabilities: vec!["relay".into()],
            timestamp: 123,
            signature: Some("sig".into()),
        };
        let datagram = Datagram::fresh(RpcBody::Store {
            from: node("a"),
            key: "peer".into(),
            value: info,
        });
        let decoded = Datagram::decode(&datagram.encode()).unwrap();
        match decoded.body {
            RpcBody::Store { value, .. } => assert_eq!(value.endpoint, "127.0.0.1:8000"),
            other => panic!("wrong body {other:?}"),
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = Datagram::fresh(RpcBody::Pong { from: node("a") }).encode();
        bytes[0] = b'X';
        assert!(Datagram::decode(&bytes).is_err());
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert!(Datagram::decode(&[0u8; 10]).is_err());
    }
}
