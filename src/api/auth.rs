// =============================================================================
// HMAC Request Signatures — broker push authentication
// =============================================================================
//
// The broker-side push agent signs every request body with HMAC-SHA256 and
// sends the hex digest in the `X-Signature` header as `sha256=<hex>`. The
// shared secret is read from the `CANDLE_HUB_INGEST_SECRET` environment
// variable on every request so that rotation does not require a restart.
//
// Verification goes through `Mac::verify_slice`, which compares in constant
// time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Expected header name for the request signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Verify a `sha256=<hex>` signature over `body` with `secret`.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_digest.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Produce the `sha256=<hex>` signature for `body`, mirroring what the
/// broker-side push agent computes.
#[cfg(test)]
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_sign_and_verify() {
        let body = br#"{"candles":[]}"#;
        let header = sign_body("topsecret", body);
        assert!(header.starts_with("sha256="));
        assert!(verify_signature("topsecret", body, &header));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let header = sign_body("secret-a", body);
        assert!(!verify_signature("secret-b", body, &header));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_body("topsecret", b"original");
        assert!(!verify_signature("topsecret", b"tampered", &header));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_signature("s", b"x", ""));
        assert!(!verify_signature("s", b"x", "md5=abcd"));
        assert!(!verify_signature("s", b"x", "sha256=not-hex"));
    }
}
