//! ChaCha20-Poly1305 with random 96-bit nonces.
//!
//! `seal`/`open` bind associated data into the tag; `encrypt`/`decrypt` are
//! the same operations with empty associated data.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;
use crate::wrap::SymmetricKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub type Nonce = [u8; NONCE_LEN];

pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<(Nonce, Vec<u8>), CryptoError> {
    seal(plaintext, key, &[])
}

pub fn decrypt(
    nonce: &[u8],
    ciphertext: &[u8],
    key: &SymmetricKey,
) -> Result<Vec<u8>, CryptoError> {
    open(nonce, ciphertext, key, &[])
}

/// Encrypt under a fresh random nonce.
pub fn seal(
    plaintext: &[u8],
    key: &SymmetricKey,
    aad: &[u8],
) -> Result<(Nonce, Vec<u8>), CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CryptoError::Encryption)?;

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(
            (&nonce).into(),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption)?;

    Ok((nonce, ciphertext))
}

/// Decrypt and authenticate.
///
/// A nonce of the wrong length, a truncated ciphertext, a wrong key and
/// mismatched associated data all yield the same `AuthenticationFailure`.
pub fn open(
    nonce: &[u8],
    ciphertext: &[u8],
    key: &SymmetricKey,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailure);
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            chacha20poly1305::Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailure)
}
