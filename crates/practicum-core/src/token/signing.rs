//! Signing primitives for completion tokens.
//!
//! A token signature is `HMAC-SHA256(derived_key, canonical_json(payload))`,
//! hex-encoded. The derived key is a single SHA-256 pass over the master
//! secret concatenated with the instance id, hex-encoded, and the 64 ASCII
//! bytes of that digest are the HMAC key. Compromising one instance's
//! derived key exposes neither the master secret nor other instances' keys.
//! The single-pass derivation is reproduced for wire compatibility; it is
//! not a full KDF and must not be relied on to protect a weak master secret
//! against offline attack.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Serialize a JSON value canonically: object keys sorted lexicographically
/// at every level, compact separators, no trailing whitespace.
///
/// Both signing and verification run the payload through this function, so
/// any representation the sender used is irrelevant; only content matters.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json string encoding of a String never fails
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single compact encoding.
        other => out.push_str(&serde_json::to_string(other).unwrap()),
    }
}

/// Derive the per-instance signing key from the master secret.
///
/// `lowercase_hex(SHA256(master || instance_id))`. The hex string itself
/// (not the raw digest) is the HMAC key.
pub fn derive_instance_key(master_secret: &str, instance_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(master_secret.as_bytes());
    hasher.update(instance_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// HMAC-SHA256 with the standard 64-byte block construction.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK_SIZE: usize = 64;

    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = Sha256::digest(key);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut i_key_pad = [0u8; BLOCK_SIZE];
    let mut o_key_pad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        i_key_pad[i] = key_block[i] ^ 0x36;
        o_key_pad[i] = key_block[i] ^ 0x5c;
    }

    let mut inner = Sha256::new();
    inner.update(i_key_pad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(o_key_pad);
    outer.update(inner_hash);
    outer.finalize().into()
}

/// Compute the hex signature for a payload under the given master secret.
///
/// The payload must contain a string `instance_id` field; returns `None`
/// otherwise (callers treat this as a malformed payload, not a panic).
pub fn sign_payload(master_secret: &str, payload: &Value) -> Option<String> {
    let instance_id = payload.get("instance_id")?.as_str()?;
    let key = derive_instance_key(master_secret, instance_id);
    let mac = hmac_sha256(key.as_bytes(), canonical_json(payload).as_bytes());
    Some(hex::encode(mac))
}

/// Assemble a complete signed token: `base64(JSON({payload, signature}))`.
pub fn issue_token(master_secret: &str, payload: &Value) -> Option<String> {
    let signature = sign_payload(master_secret, payload)?;
    let envelope = serde_json::json!({
        "payload": payload,
        "signature": signature,
    });
    // Envelope was just built from valid values
    let bytes = serde_json::to_vec(&envelope).unwrap();
    Some(BASE64.encode(bytes))
}

/// Constant-time comparison of a computed MAC against a supplied hex
/// signature. Malformed hex compares unequal without revealing where.
pub fn signature_matches(expected: &[u8; 32], supplied_hex: &str) -> bool {
    let Ok(supplied) = hex::decode(supplied_hex) else {
        return false;
    };
    if supplied.len() != expected.len() {
        return false;
    }
    expected.ct_eq(supplied.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let value = json!({
            "zeta": 1,
            "alpha": {"nested_b": 2, "nested_a": [3, {"y": 4, "x": 5}]},
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":{"nested_a":[3,{"x":5,"y":4}],"nested_b":2},"zeta":1}"#
        );
    }

    #[test]
    fn test_canonical_json_is_compact() {
        let value = json!({"a": true, "b": null, "c": "text"});
        let canonical = canonical_json(&value);
        assert!(!canonical.contains(' '));
        assert_eq!(canonical, r#"{"a":true,"b":null,"c":"text"}"#);
    }

    #[test]
    fn test_canonical_json_key_order_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_hmac_sha256_rfc4231_case_2() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_key_longer_than_block_is_hashed() {
        let long_key = [0x42u8; 100];
        let short = hmac_sha256(&Sha256::digest(long_key), b"msg");
        let long = hmac_sha256(&long_key, b"msg");
        assert_eq!(short, long);
    }

    #[test]
    fn test_derivation_is_per_instance() {
        let a = derive_instance_key("master", "instance-a");
        let b = derive_instance_key("master", "instance-b");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_requires_instance_id() {
        assert!(sign_payload("master", &json!({"user": "alice"})).is_none());
        assert!(sign_payload("master", &json!({"instance_id": 42})).is_none());
        assert!(sign_payload("master", &json!({"instance_id": "i-1"})).is_some());
    }

    #[test]
    fn test_signature_matches_rejects_bad_hex() {
        let mac = hmac_sha256(b"key", b"msg");
        assert!(signature_matches(&mac, &hex::encode(mac)));
        assert!(!signature_matches(&mac, "not-hex-at-all"));
        assert!(!signature_matches(&mac, &hex::encode(&mac[..16])));
    }

    #[test]
    fn test_issue_token_is_base64_json() {
        let payload = json!({"instance_id": "i-1", "user": "alice"});
        let token = issue_token("master", &payload).unwrap();
        let decoded = BASE64.decode(token).unwrap();
        let envelope: Value = serde_json::from_slice(&decoded).unwrap();
        assert!(envelope.get("payload").is_some());
        assert!(envelope.get("signature").is_some());
    }
}
