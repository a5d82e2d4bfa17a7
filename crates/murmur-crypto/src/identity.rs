//! Long-lived identity keys.
//!
//! A principal owns one [`KeyPair`]: an X25519 static secret that session
//! keys are wrapped to, and an Ed25519 signing key. The exported
//! [`PublicKey`] is the base64 encoding of both public halves
//! (`x25519 || ed25519`, 64 bytes) and is what the relay publishes.
//!
//! # Example
//!
//! ```
//! use murmur_crypto::identity::{KeyPair, PublicKey};
//!
//! let keypair = KeyPair::generate().unwrap();
//! let exported = keypair.public_key().export();
//!
//! let public = PublicKey::import(&exported).unwrap();
//! let signature = keypair.sign(b"challenge");
//! assert!(public.verify(b"challenge", &signature));
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::Zeroizing;

use crate::encoding;
use crate::error::CryptoError;

/// Length of an exported public key before base64.
pub const PUBLIC_KEY_LEN: usize = 64;
/// Length of the serialized private half of a [`KeyPair`].
pub const SECRET_KEY_LEN: usize = 64;
pub const SIGNATURE_LEN: usize = 64;

/// Public half of a principal's identity.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    exchange: ExchangePublic,
    verifying: VerifyingKey,
}

impl PublicKey {
    /// X25519 exchange key followed by the Ed25519 verifying key.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out[..32].copy_from_slice(self.exchange.as_bytes());
        out[32..].copy_from_slice(self.verifying.as_bytes());
        out
    }

    /// Parse raw key bytes.
    ///
    /// Rejects the wrong length, an all-zero exchange key, Ed25519 points
    /// that do not decompress and small-order (weak) Ed25519 keys.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::MalformedKey);
        }

        let mut exchange = [0u8; 32];
        exchange.copy_from_slice(&bytes[..32]);
        if exchange == [0u8; 32] {
            return Err(CryptoError::MalformedKey);
        }

        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[32..]);
        let verifying =
            VerifyingKey::from_bytes(&verifying).map_err(|_| CryptoError::MalformedKey)?;
        if verifying.is_weak() {
            return Err(CryptoError::MalformedKey);
        }

        Ok(Self {
            exchange: ExchangePublic::from(exchange),
            verifying,
        })
    }

    /// Text form published through the relay.
    pub fn export(&self) -> String {
        encoding::encode(self.to_bytes())
    }

    /// Parse the text form. Any decoding problem is a `MalformedKey`.
    pub fn import(text: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode(text.trim()).map_err(|_| CryptoError::MalformedKey)?;
        Self::from_bytes(&bytes)
    }

    /// Verify an Ed25519 signature made by the matching [`KeyPair`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.verifying.verify_strict(message, &sig).is_ok()
    }

    pub(crate) fn exchange_key(&self) -> &ExchangePublic {
        &self.exchange
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exported = self.export();
        write!(f, "PublicKey({}…)", &exported[..12])
    }
}

/// A principal's private identity.
///
/// Both secrets are zeroized on drop by their underlying types.
pub struct KeyPair {
    exchange: StaticSecret,
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a new key pair from the OS CSPRNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
        Ok(Self::from_bytes(&seed))
    }

    /// Rebuild from the bytes produced by [`KeyPair::to_bytes`].
    pub fn from_bytes(bytes: &[u8; SECRET_KEY_LEN]) -> Self {
        let mut exchange = Zeroizing::new([0u8; 32]);
        exchange.copy_from_slice(&bytes[..32]);
        let mut signing = Zeroizing::new([0u8; 32]);
        signing.copy_from_slice(&bytes[32..]);

        Self {
            exchange: StaticSecret::from(*exchange),
            signing: SigningKey::from_bytes(&signing),
        }
    }

    /// Private key bytes (`x25519 || ed25519`).
    ///
    /// # Security
    /// These bytes recreate the identity.
    pub fn to_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        let mut out = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        out[..32].copy_from_slice(&self.exchange.to_bytes());
        out[32..].copy_from_slice(&self.signing.to_bytes());
        out
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            exchange: ExchangePublic::from(&self.exchange),
            verifying: self.signing.verifying_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }

    /// Write the private key to `path` with 0600 permissions on Unix.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        fs::write(path, &bytes[..])
            .with_context(|| format!("failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = Zeroizing::new(
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        );

        if bytes.len() != SECRET_KEY_LEN {
            anyhow::bail!(
                "invalid identity file length: expected {} bytes, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            );
        }

        let mut key_bytes = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        key_bytes.copy_from_slice(&bytes);
        Ok(Self::from_bytes(&key_bytes))
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}
