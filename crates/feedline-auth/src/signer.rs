//! Login signature
//!
//! The session treats signing as an external collaborator: anything that
//! implements [`Signer`] can be plugged in. [`HmacSha256Signer`] is the
//! scheme the streaming API expects by default:
//!
//! 1. prehash = `path + method + timestamp + nonce + body`
//! 2. HMAC-SHA256(secret, prehash), lowercase hex
//! 3. Base64 of the hex string

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use feedline_types::LoginArgs;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// HTTP method signed for a streaming login
pub const LOGIN_METHOD: &str = "GET";

/// Request path signed for a streaming login
pub const LOGIN_PATH: &str = "/users/self/verify";

/// Produces an authentication signature
pub trait Signer: Send + Sync {
    /// Sign one request
    fn sign(
        &self,
        secret: &str,
        method: &str,
        path: &str,
        timestamp: &str,
        nonce: &str,
        body: &str,
    ) -> String;
}

/// Default HMAC-SHA256 signer
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Signer;

impl Signer for HmacSha256Signer {
    fn sign(
        &self,
        secret: &str,
        method: &str,
        path: &str,
        timestamp: &str,
        nonce: &str,
        body: &str,
    ) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(path.as_bytes());
        mac.update(method.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(nonce.as_bytes());
        mac.update(body.as_bytes());
        let digest = mac.finalize().into_bytes();

        BASE64.encode(hex::encode(digest))
    }
}

impl<F> Signer for F
where
    F: Fn(&str, &str, &str, &str, &str, &str) -> String + Send + Sync,
{
    fn sign(
        &self,
        secret: &str,
        method: &str,
        path: &str,
        timestamp: &str,
        nonce: &str,
        body: &str,
    ) -> String {
        self(secret, method, path, timestamp, nonce, body)
    }
}

/// Build the arguments of a login frame for one attempt
pub fn login_args(
    credentials: &Credentials,
    signer: &dyn Signer,
    timestamp: &str,
    nonce: &str,
) -> LoginArgs {
    let sign = signer.sign(
        credentials.expose_secret(),
        LOGIN_METHOD,
        LOGIN_PATH,
        timestamp,
        nonce,
        "",
    );

    LoginArgs {
        api_key: credentials.api_key().to_string(),
        passphrase: credentials.expose_passphrase().to_string(),
        timestamp: timestamp.to_string(),
        sign,
        nonce: nonce.to_string(),
    }
}
