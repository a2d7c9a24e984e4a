//! Helpers for keeping sensitive request data out of telemetry.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const REDACTED: &str = "[REDACTED]";
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Copy of `headers` with the value of every sensitive header (case-insensitive)
/// replaced by [`REDACTED`].
pub fn sanitize_headers(
    headers: &HashMap<String, String>,
    sensitive_headers: &[String],
) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let sensitive = sensitive_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name));
            let value = if sensitive { REDACTED } else { value.as_str() };
            (name.clone(), value.to_string())
        })
        .collect()
}

/// Cut `payload` to at most `max_size` bytes (on a char boundary) and mark the cut.
pub fn truncate_payload(payload: &str, max_size: usize) -> String {
    if payload.len() <= max_size {
        return payload.to_string();
    }
    let mut end = max_size;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &payload[..end], TRUNCATION_MARKER)
}

/// First 16 hex chars of SHA-256(ip || salt).
pub fn hash_ip(ip: &str, salt: &str) -> String {
    let mut h = Sha256::new();
    h.update(ip.as_bytes());
    h.update(salt.as_bytes());
    let mut digest = format!("{:x}", h.finalize());
    digest.truncate(16);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sensitive_headers_case_insensitively() {
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer secret".to_string()),
            ("X-API-Key".to_string(), "k".to_string()),
            ("Accept".to_string(), "text/html".to_string()),
        ]);
        let sensitive = vec!["authorization".to_string(), "x-api-key".to_string()];

        let clean = sanitize_headers(&headers, &sensitive);
        assert_eq!(clean["Authorization"], REDACTED);
        assert_eq!(clean["X-API-Key"], REDACTED);
        assert_eq!(clean["Accept"], "text/html");
    }

    #[test]
    fn truncates_long_payloads_only() {
        assert_eq!(truncate_payload("short", 10), "short");
        assert_eq!(truncate_payload("0123456789", 10), "0123456789");
        assert_eq!(truncate_payload("0123456789abc", 10), "0123456789...[TRUNCATED]");
        // 'é' is two bytes; never split it
        assert_eq!(truncate_payload("aé", 2), "a...[TRUNCATED]");
    }

    #[test]
    fn ip_hash_is_stable_and_salted() {
        let a = hash_ip("192.168.1.1", "");
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, hash_ip("192.168.1.1", ""));
        assert_ne!(a, hash_ip("192.168.1.1", "salt"));
        assert_ne!(a, hash_ip("192.168.1.2", ""));
    }
}
