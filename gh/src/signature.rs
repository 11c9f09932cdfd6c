//! Webhook signature verification.
//!
//! GitHub signs the raw body with HMAC-SHA256 and sends the hex digest in
//! `X-Hub-Signature-256` as `sha256=<hex>`. The comparison is constant-time;
//! a missing or malformed header fails closed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `signature_header` against the raw `body` with `secret`.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: Option<&str>) -> bool {
    let Some(header) = signature_header else {
        return false;
    };
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.ct_eq(expected.as_slice()).into()
}

/// Computes the signature header value for a body; test helper and client
/// for loopback deliveries.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts any key length; the error arm is unreachable.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"action":"opened"}"#;
        let header = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, Some(&header)));
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign("topsecret", b"original");
        assert!(!verify_signature("topsecret", b"tampered", Some(&header)));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign("secret-a", body);
        assert!(!verify_signature("secret-b", body, Some(&header)));
    }

    #[test]
    fn missing_or_malformed_header_fails_closed() {
        assert!(!verify_signature("s", b"x", None));
        assert!(!verify_signature("s", b"x", Some("sha1=abcdef")));
        assert!(!verify_signature("s", b"x", Some("sha256=zz-not-hex")));
        assert!(!verify_signature("s", b"x", Some("")));
    }
}
