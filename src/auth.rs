//! Credentials and request signing for private exchange channels.
//!
//! # Signing Flow
//!
//! 1. Draw a fresh nonce (strictly increasing per process)
//! 2. URL-encode it as the payload: `nonce=<n>`
//! 3. Sign the payload with HMAC-SHA512 keyed by the account secret
//! 4. Send `key`, `payload` and the hex signature with the subscribe command

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

/// Authentication-specific errors
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No API key or secret configured
    #[error("Missing API credentials")]
    MissingCredentials,

    /// Secret cannot be used as an HMAC key
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    /// System time error (before UNIX epoch)
    #[error("System time error: {0}")]
    SystemTime(String),

    /// Payload could not be URL-encoded
    #[error("Payload encoding error: {0}")]
    Encoding(String),
}

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// API key pair for one exchange account.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty() || self.secret.is_empty()
    }
}

/// Signed fields appended to a private subscribe command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedPayload {
    pub key: String,
    pub payload: String,
    pub sign: String,
}

/// Source of strictly increasing nonces.
///
/// Seeds from the wall clock in nanoseconds and bumps by one whenever the
/// clock has not advanced since the previous call.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> AuthResult<u64> {
        let now = unix_nanos()?;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(candidate),
                Err(actual) => prev = actual,
            }
        }
    }
}

fn unix_nanos() -> AuthResult<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| AuthError::SystemTime("System time before UNIX epoch".to_string()))?;
    Ok(elapsed.as_nanos() as u64)
}

/// Hex-encoded HMAC-SHA512 of `payload` keyed by `secret`.
pub fn sign(secret: &str, payload: &str) -> AuthResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the signed fields for a private channel subscription.
pub fn sign_nonce(credentials: &Credentials, nonce: u64) -> AuthResult<SignedPayload> {
    if credentials.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let payload = serde_urlencoded::to_string([("nonce", nonce)])
        .map_err(|e| AuthError::Encoding(e.to_string()))?;
    let sign = sign(&credentials.secret, &payload)?;

    Ok(SignedPayload {
        key: credentials.key.clone(),
        payload,
        sign,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let sig = sign("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_sign_nonce_payload() {
        let creds = Credentials::new("api-key", "secret");
        let signed = sign_nonce(&creds, 42).unwrap();

        assert_eq!(signed.key, "api-key");
        assert_eq!(signed.payload, "nonce=42");
        assert_eq!(signed.sign, sign("secret", "nonce=42").unwrap());
        assert_eq!(signed.sign.len(), 128);
    }

    #[test]
    fn test_sign_nonce_requires_credentials() {
        let creds = Credentials::new("", "secret");
        assert!(matches!(
            sign_nonce(&creds, 1),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_nonce_strictly_increasing() {
        let nonces = NonceGenerator::new();
        let mut prev = nonces.next().unwrap();
        for _ in 0..1000 {
            let next = nonces.next().unwrap();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("k", "very-secret");
        assert!(!format!("{:?}", creds).contains("very-secret"));
    }
}
