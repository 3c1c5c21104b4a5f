use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

const PREFIX: &str = "sha256=";

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))
}

/// Signature header value for a payload, as the code host computes it.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = mac(secret)?;
    mac.update(payload);
    Ok(format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` signature header against the payload.
/// An empty secret rejects everything rather than accepting unsigned events.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(AppError::WebhookVerification(
            "No webhook secret configured".to_string(),
        ));
    }

    let signature_hex = signature_header
        .strip_prefix(PREFIX)
        .ok_or_else(|| AppError::WebhookVerification("Missing sha256= prefix".to_string()))?;
    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| AppError::WebhookVerification(format!("Invalid hex in signature: {e}")))?;

    let mut mac = mac(secret)?;
    mac.update(payload);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| AppError::WebhookVerification("Signature mismatch".to_string()))
}
