//! Security primitives for Toolwright: credential acquisition and secret redaction.
//!
//! Provides:
//! - **Credentials**: scope-keyed bearer-token cache with single-flight refresh
//!   over a CLI delegate and an OAuth client-credentials exchange
//! - **Redaction**: masking of tokens, keys and auth headers before anything
//!   is logged or sent to a client

pub mod credentials;
pub mod redact;

pub use credentials::{
    AccessToken, CachedCredential, ClientCredentialsSource, CliSource, CredentialSource, ScopeSet,
    TokenManager, TokenSource, fingerprint, jwt_expiry,
};
pub use redact::{MASK, is_sensitive_key, redact_text, redact_value};
