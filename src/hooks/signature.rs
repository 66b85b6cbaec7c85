//! Delivery signature verification (`X-Hub-Signature: sha1=<hex>`)
//!
//! GitHub signs every delivery with an HMAC of the raw request body keyed by
//! the webhook secret. Only the SHA-1 header is understood here; any other
//! algorithm name is reported separately from a bad digest so the caller can
//! answer 501 instead of 403.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;
use tracing::warn;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// The only supported digest algorithm name.
pub const SUPPORTED_ALGORITHM: &str = "sha1";

/// Signature verification failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature mismatch")]
    Mismatch,
}

fn keyed_mac(secret: &str, body: &[u8]) -> Result<HmacSha1, SignatureError> {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    Ok(mac)
}

/// Compute the `sha1=<hex>` header value GitHub would send for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = keyed_mac(secret, body)?;
    Ok(format!(
        "{}={}",
        SUPPORTED_ALGORITHM,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a delivery signature against the raw body.
///
/// An empty `secret` means verification is disabled and every request
/// passes. The digest comparison is constant-time (`Mac::verify_slice`).
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Ok(());
    }

    let Some(header) = header else {
        warn!(target: "hooks", "No signature found when expecting one");
        return Err(SignatureError::Missing);
    };

    let (algorithm, digest) = header.split_once('=').unwrap_or((header, ""));
    if algorithm != SUPPORTED_ALGORITHM {
        warn!(target: "hooks", algorithm = %algorithm, "Unsupported signature mechanism");
        return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let expected = match hex::decode(digest.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(target: "hooks", "Signature digest is not valid hex");
            return Err(SignatureError::Mismatch);
        }
    };

    keyed_mac(secret, body)?.verify_slice(&expected).map_err(|_| {
        warn!(target: "hooks", "Invalid digest comparison");
        SignatureError::Mismatch
    })
}
