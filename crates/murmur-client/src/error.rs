use murmur_common::RejectReason;
use murmur_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced to the application.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid principal name: {0:?}")]
    InvalidName(String),

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("could not establish a session with {peer}: {reason}")]
    SessionEstablishmentFailed { peer: String, reason: ExchangeError },

    #[error("relay rejected registration: {0}")]
    Rejected(RejectReason),

    #[error("connection to relay closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Common(#[from] murmur_common::Error),
}

impl ClientError {
    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }
}

/// Why one key-exchange attempt failed. Never retried by itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("peer is not registered")]
    PeerNotFound,

    #[error("peer published a malformed key")]
    PeerKeyInvalid,

    #[error("key exchange is missing its signature")]
    MissingSignature,

    #[error("key exchange signature does not verify")]
    BadSignature,

    #[error("wrapped key could not be recovered")]
    Unwrap,

    #[error("key exchange is outside the freshness window")]
    Stale,

    #[error("key exchange was already accepted")]
    Replayed,

    #[error("no confirmation before the exchange timeout")]
    Timeout,

    #[error("exchange was superseded")]
    Aborted,

    #[error("crypto failure: {0}")]
    Crypto(CryptoError),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<CryptoError> for ExchangeError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Unwrap => Self::Unwrap,
            CryptoError::MalformedKey => Self::PeerKeyInvalid,
            other => Self::Crypto(other),
        }
    }
}
