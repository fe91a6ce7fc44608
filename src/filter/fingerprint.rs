//! Stable hash over a canonicalized filter AST.
//!
//! Used as the compatibility key stored in `SyncCheckpoint`/`DerivationCheckpoint`:
//! a checkpoint is only honored if the filter that produced it still fingerprints
//! the same way.

use sha2::{Digest, Sha256};

use super::FilterAst;

/// Canonical JSON form: `And`/`Or` children sorted by their own canonical
/// encoding so that e.g. `And[A,B]` and `And[B,A]` fingerprint identically.
/// Handles and hashtags are already lowercased by their newtypes, so no
/// further case normalization is needed here.
fn canonicalize(filter: &FilterAst) -> serde_json::Value {
    match filter {
        FilterAst::And { clauses } => {
            let mut encoded: Vec<serde_json::Value> = clauses.iter().map(canonicalize).collect();
            encoded.sort_by_key(|v| v.to_string());
            serde_json::json!({ "kind": "And", "clauses": encoded })
        }
        FilterAst::Or { clauses } => {
            let mut encoded: Vec<serde_json::Value> = clauses.iter().map(canonicalize).collect();
            encoded.sort_by_key(|v| v.to_string());
            serde_json::json!({ "kind": "Or", "clauses": encoded })
        }
        FilterAst::Not { clause } => {
            serde_json::json!({ "kind": "Not", "clause": canonicalize(clause) })
        }
        other => serde_json::to_value(other).expect("FilterAst always serializes"),
    }
}

/// Hex-encoded SHA-256 of the canonical JSON encoding.
pub fn fingerprint(filter: &FilterAst) -> String {
    let canonical = canonicalize(filter);
    let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
    let digest = Sha256::digest(&bytes);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String never fails");
    }
    s
}
