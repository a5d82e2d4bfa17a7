//! Session keys and wrapping them to a peer's public key.
//!
//! Wrapped layout: `ephemeral_pub (32) || nonce (12) || ciphertext (32 + 16)`.
//! The wrapping key is `HKDF-SHA256(ikm = X25519(eph, peer), salt = eph_pub
//! || peer_pub, info = "murmur/wrap/v1")`, and the ephemeral public key is
//! also bound as associated data.

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead::{self, NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;
use crate::identity::{KeyPair, PublicKey};

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const WRAPPED_KEY_LEN: usize = 32 + NONCE_LEN + SYMMETRIC_KEY_LEN + TAG_LEN;

const WRAP_INFO: &[u8] = b"murmur/wrap/v1";

/// 256-bit session key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
        let key = Self(bytes);
        bytes.zeroize();
        Ok(key)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &SymmetricKey) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

fn derive_wrapping_key(
    shared: &[u8; 32],
    ephemeral: &ExchangePublic,
    recipient: &ExchangePublic,
) -> Option<SymmetricKey> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
    hk.expand(WRAP_INFO, &mut okm[..]).ok()?;
    Some(SymmetricKey::from_bytes(*okm))
}

/// Wrap `key` so only the holder of `recipient`'s private key can unwrap it.
pub fn wrap_symmetric_key(
    key: &SymmetricKey,
    recipient: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let mut seed = Zeroizing::new([0u8; 32]);
    OsRng
        .try_fill_bytes(&mut seed[..])
        .map_err(|e| CryptoError::Wrap(e.to_string()))?;
    let ephemeral = StaticSecret::from(*seed);
    let ephemeral_pub = ExchangePublic::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(recipient.exchange_key());
    if !shared.was_contributory() {
        return Err(CryptoError::Wrap("recipient key is low order".into()));
    }

    let kek = derive_wrapping_key(shared.as_bytes(), &ephemeral_pub, recipient.exchange_key())
        .ok_or_else(|| CryptoError::Wrap("key derivation failed".into()))?;
    let (nonce, ciphertext) = aead::seal(key.as_bytes(), &kek, ephemeral_pub.as_bytes())
        .map_err(|e| CryptoError::Wrap(e.to_string()))?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Recover a wrapped session key. Every failure is the same `Unwrap`.
pub fn unwrap_symmetric_key(wrapped: &[u8], own: &KeyPair) -> Result<SymmetricKey, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::Unwrap);
    }
    let (eph, rest) = wrapped.split_at(32);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut eph_bytes = [0u8; 32];
    eph_bytes.copy_from_slice(eph);
    let ephemeral_pub = ExchangePublic::from(eph_bytes);

    let shared = own.exchange_secret().diffie_hellman(&ephemeral_pub);
    if !shared.was_contributory() {
        return Err(CryptoError::Unwrap);
    }

    let own_pub = ExchangePublic::from(own.exchange_secret());
    let kek = derive_wrapping_key(shared.as_bytes(), &ephemeral_pub, &own_pub)
        .ok_or(CryptoError::Unwrap)?;
    let raw = Zeroizing::new(
        aead::open(nonce, ciphertext, &kek, ephemeral_pub.as_bytes())
            .map_err(|_| CryptoError::Unwrap)?,
    );

    let bytes: [u8; SYMMETRIC_KEY_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Unwrap)?;
    Ok(SymmetricKey::from_bytes(bytes))
}
