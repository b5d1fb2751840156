use sha1::Digest as _;
use sha2::{Digest, Sha256};

/// Compute SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 as a full hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// First `hex_len` hex chars of SHA-256. Chunk checksums use 32 chars.
pub fn sha256_prefix_hex(data: &[u8], hex_len: usize) -> String {
    let mut s = sha256_hex(data);
    s.truncate(hex_len);
    s
}

/// 160-bit SHA-1 digest used for DHT node and key ids.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = sha1::Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Canonical JSON rendering with recursively sorted object keys. Signed
/// records hash this form so signer and verifier agree byte-for-byte.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                out.push('{');
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string serializes"));
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => {
                out.push_str(&other.to_string());
            }
        }
    }
    let mut out = String::new();
    write(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_prefix_is_stable() {
        let p = sha256_prefix_hex(b"hello", 32);
        assert_eq!(p.len(), 32);
        assert!(sha256_hex(b"hello").starts_with(&p));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v: serde_json::Value =
            serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":[2,1]}}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":{"y":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn sha1_is_160_bits() {
        assert_eq!(sha1_digest(b"node").len(), 20);
    }
}
