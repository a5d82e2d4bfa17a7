use thiserror::Error;

/// Codec failures.
///
/// `Unwrap` and `AuthenticationFailure` deliberately carry no detail: a
/// caller must not be able to tell a bad tag from a bad length or a key
/// mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGen(String),

    #[error("key wrapping failed: {0}")]
    Wrap(String),

    #[error("key unwrapping failed")]
    Unwrap,

    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("encryption failed")]
    Encryption,

    #[error("malformed public key")]
    MalformedKey,

    #[error("malformed encoding: {0}")]
    Encoding(String),
}
