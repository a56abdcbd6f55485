//! API credentials
//!
//! # Security
//!
//! The secret and passphrase are stored using the `secrecy` crate which:
//! - Zeroizes memory on drop
//! - Prevents accidental logging via Debug impl
//! - Provides explicit access via `expose_secret()`

use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AuthError, AuthResult};
use tracing::debug;

/// Counter mixed into nonces so two attempts in the same instant differ
static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Environment variable holding the API key
pub const ENV_API_KEY: &str = "FEEDLINE_API_KEY";
/// Environment variable holding the API secret
pub const ENV_API_SECRET: &str = "FEEDLINE_API_SECRET";
/// Environment variable holding the API passphrase
pub const ENV_API_PASSPHRASE: &str = "FEEDLINE_API_PASSPHRASE";

/// API credentials for private streams
pub struct Credentials {
    /// API key (public)
    api_key: String,
    /// API secret, zeroized on drop
    secret: SecretString,
    /// API passphrase, zeroized on drop
    passphrase: SecretString,
}

impl Credentials {
    /// Create credentials from their three parts
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: SecretString::from(secret.into()),
            passphrase: SecretString::from(passphrase.into()),
        }
    }

    /// Create credentials from environment variables
    ///
    /// Reads `FEEDLINE_API_KEY`, `FEEDLINE_API_SECRET` and
    /// `FEEDLINE_API_PASSPHRASE`.
    pub fn from_env() -> AuthResult<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| AuthError::EnvVarNotSet(name.to_string()))
        };

        let creds = Self::new(
            var(ENV_API_KEY)?,
            var(ENV_API_SECRET)?,
            var(ENV_API_PASSPHRASE)?,
        );
        creds.validate()?;
        debug!(api_key = %creds.redacted_key(), "Loaded credentials from environment");
        Ok(creds)
    }

    /// Reject obviously unusable credentials
    pub fn validate(&self) -> AuthResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("API key is empty".into()));
        }
        if self.secret.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials("API secret is empty".into()));
        }
        Ok(())
    }

    /// Get the API key
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Controlled access to the secret, for the signer only
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Controlled access to the passphrase, for the login frame only
    pub fn expose_passphrase(&self) -> &str {
        self.passphrase.expose_secret()
    }
}

impl Credentials {
    fn redacted_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

impl Clone for Credentials {
    /// Clone credentials (creates new secret boxes with the same content)
    fn clone(&self) -> Self {
        Self::new(
            self.api_key.clone(),
            self.secret.expose_secret().to_owned(),
            self.passphrase.expose_secret().to_owned(),
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.redacted_key())
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Milliseconds since the Unix epoch, as the login timestamp string
pub fn timestamp_millis() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    millis.to_string()
}

/// Generate a fresh nonce for one login attempt
///
/// 128 random bits in hex; the low bits are mixed with a process-wide
/// counter so repeated calls never collide.
pub fn generate_nonce() -> String {
    let counter = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed) as u128;
    let random: u128 = rand::random();
    format!("{:032x}", random ^ counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_generation() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();
        assert_ne!(nonce1, nonce2);
        assert_eq!(nonce1.len(), 32);
    }

    #[test]
    fn test_timestamp_is_millis() {
        let ts = timestamp_millis();
        assert_eq!(ts.len(), 13);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("abcdefghijkl", "super-secret", "pass-phrase");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("pass-phrase"));
        assert!(debug.contains("abcdefgh..."));
    }

    #[test]
    fn test_clone_keeps_secret() {
        let creds = Credentials::new("key", "secret", "pass");
        let cloned = creds.clone();
        assert_eq!(cloned.api_key(), "key");
        assert_eq!(cloned.expose_secret(), "secret");
        assert_eq!(cloned.expose_passphrase(), "pass");
    }

    #[test]
    fn test_validate() {
        assert!(Credentials::new("key", "secret", "pass").validate().is_ok());
        assert!(Credentials::new("", "secret", "pass").validate().is_err());
        assert!(Credentials::new("key", "", "pass").validate().is_err());
    }
}
