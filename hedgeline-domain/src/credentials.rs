//! Exchange API Credentials
//!
//! Plaintext API credentials held in memory for signing requests.

use std::fmt;
use zeroize::Zeroize;

/// API credentials (in-memory only, never persisted).
///
/// This struct contains the plaintext credentials and should:
/// - Never be logged (`Debug` redacts both fields)
/// - Never be serialized to disk
/// - Be zeroized when dropped
#[derive(Clone)]
pub struct ApiCredentials {
    /// API Key (public identifier)
    pub api_key: String,
    /// API Secret (secret key)
    pub api_secret: zeroize::Zeroizing<String>,
}

impl ApiCredentials {
    /// Create new API credentials.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: zeroize::Zeroizing::new(api_secret.into()),
        }
    }

    /// Secret bytes for HMAC signing
    pub fn secret_bytes(&self) -> &[u8] {
        self.api_secret.as_bytes()
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_hint = self.api_key.get(..4).unwrap_or("");
        f.debug_struct("ApiCredentials")
            .field("api_key", &format_args!("{}***", key_hint))
            .field("api_secret", &"***")
            .finish()
    }
}

impl Zeroize for ApiCredentials {
    fn zeroize(&mut self) {
        self.api_key.zeroize();
        self.api_secret.zeroize();
    }
}

impl Drop for ApiCredentials {
    fn drop(&mut self) {
        self.zeroize();
    }
}
