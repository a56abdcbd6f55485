//! Credentials and login signing for the feedline streaming client
//!
//! Private channels require a `login` frame signed with the account's API
//! secret. This crate keeps the secret material out of logs and memory dumps
//! and defines the [`Signer`] collaborator the session uses to produce the
//! signature.
//!
//! # Example
//!
//! ```
//! use feedline_auth::{login_args, Credentials, HmacSha256Signer};
//!
//! let creds = Credentials::new("my-key", "my-secret", "my-passphrase");
//! let args = login_args(&creds, &HmacSha256Signer, "1700000000000", "nonce-1");
//! assert_eq!(args.api_key, "my-key");
//! ```

mod credentials;
mod error;
mod signer;

pub use credentials::{
    generate_nonce, timestamp_millis, Credentials, ENV_API_KEY, ENV_API_PASSPHRASE, ENV_API_SECRET,
};
pub use error::{AuthError, AuthResult};
pub use signer::{login_args, HmacSha256Signer, Signer, LOGIN_METHOD, LOGIN_PATH};
