use std::fmt;

use pactnet_core::constants::DHT_NODE_ID_BYTES;
use pactnet_crypto::sha1_digest;

/// 160-bit node/key identifier in the XOR metric space, derived as
/// SHA-1 of the entity id (or lookup key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; DHT_NODE_ID_BYTES]);

impl NodeId {
    pub fn from_entity(entity_id: &str) -> Self {
        Self(sha1_digest(entity_id.as_bytes()))
    }

    /// Key ids share the node id space so values land near their owners.
    pub fn from_key(key: &str) -> Self {
        Self(sha1_digest(key.as_bytes()))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; DHT_NODE_ID_BYTES] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// XOR distance to `other`.
    pub fn distance(&self, other: &NodeId) -> [u8; DHT_NODE_ID_BYTES] {
        let mut out = [0u8; DHT_NODE_ID_BYTES];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Index of the bucket covering `other`: the position of the highest
    /// set bit of the XOR distance (0 = farthest, 159 = closest). `None`
    /// when the ids are equal.
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let dist = self.distance(other);
        for (byte_idx, byte) in dist.iter().enumerate() {
            if *byte != 0 {
                let bit = byte.leading_zeros() as usize;
                return Some(byte_idx * 8 + bit);
            }
        }
        None
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}…)", &self.to_hex()[..8])
    }
}

/// Ordering helper: compare two ids by XOR distance to a target.
pub fn cmp_distance(a: &NodeId, b: &NodeId, target: &NodeId) -> std::cmp::Ordering {
    a.distance(target).cmp(&b.distance(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_160_bits_and_deterministic() {
        let a = NodeId::from_entity("agent-a");
        let b = NodeId::from_entity("agent-a");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 40);
    }

    #[test]
    fn distance_is_symmetric_and_zero_to_self() {
        let a = NodeId::from_entity("agent-a");
        let b = NodeId::from_entity("agent-b");
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), [0u8; DHT_NODE_ID_BYTES]);
        assert_eq!(a.bucket_index(&a), None);
    }

    #[test]
    fn bucket_index_tracks_highest_differing_bit() {
        let a = NodeId([0u8; 20]);
        let mut close = [0u8; 20];
        close[19] = 0x01; // differs only in the lowest bit
        assert_eq!(a.bucket_index(&NodeId(close)), Some(159));

        let mut far = [0u8; 20];
        far[0] = 0x80; // differs in the highest bit
        assert_eq!(a.bucket_index(&NodeId(far)), Some(0));
    }

    #[test]
    fn cmp_distance_orders_by_closeness() {
        let target = NodeId([0u8; 20]);
        let mut near = [0u8; 20];
        near[19] = 1;
        let mut far = [0u8; 20];
        far[0] = 1;
        assert_eq!(
            cmp_distance(&NodeId(near), &NodeId(far), &target),
            std::cmp::Ordering::Less
        );
    }
}
