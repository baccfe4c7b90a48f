//! HMAC-SHA256 body signatures: `X-Signature-256: sha256=<hex>`

use crate::utils::AppError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, warn};

pub const SIGNATURE_HEADER: &str = "X-Signature-256";

type HmacSha256 = Hmac<Sha256>;

/// Check `signature` against the HMAC of `body` keyed with `secret`.
pub fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> Result<(), AppError> {
    let digest = signature.strip_prefix("sha256=").ok_or_else(|| {
        warn!("Invalid signature format: missing sha256= prefix");
        AppError::unauthorized("Invalid signature format")
    })?;

    let expected = hex::decode(digest).map_err(|_| {
        warn!("Invalid signature format: digest is not hex");
        AppError::unauthorized("Invalid signature format")
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        error!(error = %e, "HMAC initialization failed");
        AppError::internal_error("HMAC error")
    })?;
    mac.update(body);

    mac.verify_slice(&expected).map_err(|_| {
        warn!("Receiver signature mismatch");
        AppError::unauthorized("Signature mismatch")
    })
}

/// `sha256=<hex>` header value for `body`. Used by senders and tests.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::internal_error(format!("HMAC error: {}", e)))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
