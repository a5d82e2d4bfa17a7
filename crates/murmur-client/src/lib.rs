//! Murmur client library.
//!
//! Holds a principal's identity, negotiates per-peer session keys through
//! signed key-exchange envelopes and encrypts messages end to end. The relay
//! only ever sees ciphertext and wrapped keys.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod exchange;
pub mod replay;
pub mod store;
pub mod transport;

pub use client::{Client, ClientEvent};
pub use config::{ClientConfig, SignaturePolicy};
pub use error::{ClientError, ExchangeError};
pub use exchange::{canonical_initiator, KeyExchange, Offer, SessionState};
pub use replay::ReplayGuard;
pub use store::{SessionKey, SessionKeyStore};
pub use transport::{RelayConnection, Transport};
