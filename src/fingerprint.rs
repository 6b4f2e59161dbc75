//! Deterministic request fingerprints for the cache and single-flight.
//!
//! The fingerprint is SHA-256 over a canonical serialization of the request:
//! lowercased model, the messages in order, and the numeric sampling
//! parameters in a fixed key order with fixed 6-dp formatting. Unrecognized
//! request keys never reach this module — they are dropped when the body
//! deserializes into [`ChatRequest`] — so clients that send vendor
//! extensions still share cache entries.

use sha2::{Digest, Sha256};

use crate::models::ChatRequest;

/// Separates the role from the content inside one message.
const UNIT_SEP: u8 = 0x1F;
/// Terminates each message.
const RECORD_SEP: u8 = 0x1E;
/// Separates the model / messages / parameters sections.
const GROUP_SEP: u8 = 0x1D;

/// Compute the 64-hex-char fingerprint of a canonical request.
///
/// Stable across processes and releases: any change to this encoding
/// invalidates every durable cache entry, so the format is append-only.
pub fn fingerprint(req: &ChatRequest) -> String {
    let mut hasher = Sha256::new();

    hasher.update(req.model.to_lowercase().as_bytes());
    hasher.update([GROUP_SEP]);

    for msg in &req.messages {
        hasher.update(msg.role.as_bytes());
        hasher.update([UNIT_SEP]);
        hasher.update(msg.content.as_bytes());
        hasher.update([RECORD_SEP]);
    }
    hasher.update([GROUP_SEP]);

    hasher.update(param_string(req).as_bytes());

    hex_encode(&hasher.finalize())
}

/// SHA-256 of the concatenated user-message text, stored alongside cache
/// entries so operators can group entries by prompt without the payload.
pub fn prompt_hash(req: &ChatRequest) -> String {
    let mut hasher = Sha256::new();
    for msg in req.messages.iter().filter(|m| m.role == "user") {
        hasher.update(msg.content.as_bytes());
        hasher.update([RECORD_SEP]);
    }
    hex_encode(&hasher.finalize())
}

/// Numeric parameters in fixed alphabetical key order, each at 6 dp.
/// Absent parameters take their canonical defaults so that an explicit
/// `temperature: 1.0` and an omitted temperature hash identically.
fn param_string(req: &ChatRequest) -> String {
    format!(
        "frequency_penalty={:.6};max_tokens={:.6};presence_penalty={:.6};temperature={:.6};top_p={:.6}",
        req.frequency_penalty.unwrap_or(0.0),
        req.max_tokens.unwrap_or(0) as f64,
        req.presence_penalty.unwrap_or(0.0),
        req.temperature.unwrap_or(1.0),
        req.top_p.unwrap_or(1.0),
    )
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
