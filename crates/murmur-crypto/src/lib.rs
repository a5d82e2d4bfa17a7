//! Cryptographic primitives for Murmur.
//!
//! This crate provides:
//! - Long-lived identity key pairs (X25519 for key agreement, Ed25519 for signing)
//! - Session key wrapping to a peer's published public key
//! - ChaCha20-Poly1305 authenticated encryption with random nonces
//! - Base64 helpers for wire transmission
//!
//! # Design
//!
//! A session key is wrapped ECIES-style: a fresh X25519 ephemeral key is
//! combined with the recipient's static X25519 key, the shared secret is run
//! through HKDF-SHA256 and the result encrypts the raw session key with
//! ChaCha20-Poly1305. Only the holder of the recipient's private key can
//! recover it.
//!
//! Nothing here knows about envelopes, names or the relay.

#![forbid(unsafe_code)]

pub mod aead;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod wrap;

pub use aead::{decrypt, encrypt, open, seal, Nonce, NONCE_LEN};
pub use error::CryptoError;
pub use identity::{KeyPair, PublicKey, PUBLIC_KEY_LEN, SIGNATURE_LEN};
pub use wrap::{unwrap_symmetric_key, wrap_symmetric_key, SymmetricKey, WRAPPED_KEY_LEN};
