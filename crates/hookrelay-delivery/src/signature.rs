//! HMAC-SHA256 request signing.
//!
//! Receivers verify authenticity by recomputing the HMAC of the request body
//! with the shared secret and comparing it to the `X-Webhook-Signature`
//! header. The signature is computed over the exact bytes sent on the wire,
//! so body serialization and signing must share one serialization pass.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{DeliveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix carried in the signature header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signs a request body with HMAC-SHA256.
///
/// Returns `sha256=` followed by the lowercase hex digest, the value placed
/// in the `X-Webhook-Signature` header.
///
/// # Errors
///
/// Returns `DeliveryError::Configuration` if the key is rejected. HMAC
/// accepts keys of any length, so this does not occur for string secrets.
pub fn sign(body: &[u8], secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DeliveryError::configuration("invalid HMAC signing key"))?;
    mac.update(body);

    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_signature_vector() {
        let body = br#"{"event":"TASK_CREATED","id":"abc"}"#;
        let signature = sign(body, "s3cr3t").unwrap();

        assert_eq!(
            signature,
            "sha256=2294b349672a823c593dd1b59cb1d5b33fab7351531f1dbde3044ade3bb33231"
        );
    }

    #[test]
    fn signature_has_scheme_prefix_and_hex_digest() {
        let signature = sign(b"test payload", "secret").unwrap();

        assert!(signature.starts_with(SIGNATURE_PREFIX));
        let digest = &signature[SIGNATURE_PREFIX.len()..];
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, "f1f1fc517bb886ad22c56e51dae135aad082b2e3337bed35e2e44cd299324bd8");
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let body = br#"{"event":"CONTACT_CREATED","id":"42"}"#;

        let a = sign(body, "test-secret").unwrap();
        let b = sign(body, "other-secret").unwrap();

        assert_eq!(a, "sha256=38527fe128fdf734237b9b4904bad2a2d5454dbf8a43663c29c905bc53a11175");
        assert_ne!(a, b);
    }

    #[test]
    fn different_bodies_produce_different_signatures() {
        let a = sign(br#"{"id":1}"#, "secret").unwrap();
        let b = sign(br#"{"id":2}"#, "secret").unwrap();
        assert_ne!(a, b);
    }
}
