use murmur_common::RejectReason;
use thiserror::Error;

/// Why a registration was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("name {0} is already registered")]
    DuplicateIdentity(String),

    #[error("public key is malformed")]
    MalformedKey,

    #[error("name {0:?} is not valid")]
    InvalidName(String),
}

impl IdentityError {
    pub fn reason(&self) -> RejectReason {
        match self {
            IdentityError::DuplicateIdentity(_) => RejectReason::DuplicateIdentity,
            IdentityError::MalformedKey => RejectReason::MalformedKey,
            IdentityError::InvalidName(_) => RejectReason::InvalidName,
        }
    }
}

/// Why an envelope was refused. An unknown recipient is not an error; it
/// yields a `recipient_unknown` status instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("sender {0} is not registered")]
    UnauthenticatedSender(String),
}
