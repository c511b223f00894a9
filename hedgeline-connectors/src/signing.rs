//! Binance request signing.
//!
//! Binance uses API key + secret with HMAC SHA256 signatures. Signed
//! requests carry a `timestamp` parameter and a `signature` computed over
//! the alphabetically sorted `key=value&...` string. REST and WebSocket API
//! requests share the same scheme.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Current time in epoch milliseconds, as Binance expects in `timestamp`.
pub fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Sort parameters by key and join them as `k1=v1&k2=v2`.
pub fn canonical_query(params: &mut [(&str, String)]) -> String {
    params.sort_by(|a, b| a.0.cmp(b.0));
    params.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join("&")
}

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &str) -> Result<String, String> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| format!("HMAC error: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
