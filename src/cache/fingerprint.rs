//! Request fingerprinting.
//!
//! A fingerprint is a SHA-256 over (endpoint, active model version,
//! canonicalized input), hex-encoded. SHA-256 rather than the std hasher
//! because the key must be identical across process restarts and, later,
//! across nodes sharing a cache backend — SipHash is seeded per process.
//!
//! Canonicalization sorts object keys recursively, so two JSON payloads
//! that differ only in field order fingerprint identically. Numbers keep
//! their serde_json text form (`1` and `1.0` stay distinct).

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::ModelVersion;

/// Deterministic cache key for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a request.
    pub fn compute(endpoint: &str, version: &ModelVersion, input: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(input).as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Hex form of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a JSON value with object keys sorted recursively.
///
/// Pure function of the value — the canonical form, not the wire form, is
/// what gets hashed. String escaping goes through serde_json so the output
/// is itself valid JSON.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json's Display for Value::String produces the
                // escaped, quoted form.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(out, &map[*key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        // Scalars already have a canonical text form.
        other => out.push_str(&other.to_string()),
    }
}
