//! Building and opening envelopes.
//!
//! Signatures cover a canonical byte string rather than the JSON so that
//! re-serialization by the relay can never break them. Message ciphertext
//! is bound to `(sender, recipient, kind)` through the AEAD associated data.

use chrono::Utc;
use murmur_common::{Envelope, EnvelopeKind};
use murmur_crypto::{encoding, KeyPair, PublicKey, SymmetricKey};
use uuid::Uuid;

use crate::config::SignaturePolicy;
use crate::error::ExchangeError;

const SIGNING_DOMAIN: &[u8] = b"murmur/envelope/v1";
const AAD_DOMAIN: &[u8] = b"murmur/message/v1";

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

/// Bytes covered by an envelope signature, `sent_at` included so a replay
/// cannot be restamped.
pub fn signing_bytes(envelope: &Envelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + envelope.data.len());
    push_field(&mut out, SIGNING_DOMAIN);
    push_field(&mut out, envelope.id.as_bytes());
    push_field(&mut out, envelope.kind.as_str().as_bytes());
    push_field(&mut out, envelope.sender.as_bytes());
    push_field(&mut out, envelope.recipient.as_bytes());
    push_field(&mut out, &envelope.sent_at.timestamp_micros().to_be_bytes());
    push_field(&mut out, envelope.nonce.as_deref().unwrap_or("").as_bytes());
    push_field(&mut out, envelope.data.as_bytes());
    out
}

/// Associated data binding a message's ciphertext to its endpoints.
pub fn message_aad(sender: &str, recipient: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    push_field(&mut out, AAD_DOMAIN);
    push_field(&mut out, EnvelopeKind::Message.as_str().as_bytes());
    push_field(&mut out, sender.as_bytes());
    push_field(&mut out, recipient.as_bytes());
    out
}

fn blank(kind: EnvelopeKind, sender: &str, recipient: &str) -> Envelope {
    Envelope {
        id: Uuid::new_v4(),
        kind,
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        nonce: None,
        data: String::new(),
        signature: None,
        sent_at: Utc::now(),
    }
}

fn sign(envelope: &mut Envelope, identity: &KeyPair) {
    let signature = identity.sign(&signing_bytes(envelope));
    envelope.signature = Some(encoding::encode(signature));
}

/// Whether the envelope carries a valid signature by `key`.
pub fn verify_signature(envelope: &Envelope, key: &PublicKey) -> bool {
    let Some(text) = envelope.signature.as_deref() else {
        return false;
    };
    match encoding::decode(text) {
        Ok(signature) => key.verify(&signing_bytes(envelope), &signature),
        Err(_) => false,
    }
}

/// A signed `key_exchange` envelope carrying `session` wrapped to `peer_key`.
pub fn key_exchange(
    identity: &KeyPair,
    sender: &str,
    recipient: &str,
    peer_key: &PublicKey,
    session: &SymmetricKey,
) -> Result<Envelope, ExchangeError> {
    let wrapped = murmur_crypto::wrap_symmetric_key(session, peer_key)?;
    let mut envelope = blank(EnvelopeKind::KeyExchange, sender, recipient);
    envelope.data = encoding::encode(wrapped);
    sign(&mut envelope, identity);
    Ok(envelope)
}

/// Verify and unwrap a received `key_exchange` envelope.
pub fn open_key_exchange(
    envelope: &Envelope,
    identity: &KeyPair,
    sender_key: &PublicKey,
) -> Result<SymmetricKey, ExchangeError> {
    if envelope.signature.is_none() {
        return Err(ExchangeError::MissingSignature);
    }
    if !verify_signature(envelope, sender_key) {
        return Err(ExchangeError::BadSignature);
    }
    let wrapped = encoding::decode(&envelope.data).map_err(|_| ExchangeError::Unwrap)?;
    Ok(murmur_crypto::unwrap_symmetric_key(&wrapped, identity)?)
}

/// Encrypt `plaintext` under `session`, signing the envelope when `policy`
/// asks for it.
pub fn seal_message(
    identity: &KeyPair,
    sender: &str,
    recipient: &str,
    session: &SymmetricKey,
    plaintext: &[u8],
    policy: SignaturePolicy,
) -> Result<Envelope, murmur_crypto::CryptoError> {
    let (nonce, ciphertext) =
        murmur_crypto::seal(plaintext, session, &message_aad(sender, recipient))?;

    let mut envelope = blank(EnvelopeKind::Message, sender, recipient);
    envelope.nonce = Some(encoding::encode(nonce));
    envelope.data = encoding::encode(ciphertext);
    if policy == SignaturePolicy::AllEnvelopes {
        sign(&mut envelope, identity);
    }
    Ok(envelope)
}

/// Decrypt a `message` envelope. Any malformed field is reported as an
/// authentication failure.
pub fn open_message(
    envelope: &Envelope,
    session: &SymmetricKey,
) -> Result<Vec<u8>, murmur_crypto::CryptoError> {
    use murmur_crypto::CryptoError;

    let nonce = envelope
        .nonce
        .as_deref()
        .ok_or(CryptoError::AuthenticationFailure)?;
    let nonce = encoding::decode(nonce).map_err(|_| CryptoError::AuthenticationFailure)?;
    let ciphertext =
        encoding::decode(&envelope.data).map_err(|_| CryptoError::AuthenticationFailure)?;

    murmur_crypto::open(
        &nonce,
        &ciphertext,
        session,
        &message_aad(&envelope.sender, &envelope.recipient),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_exchange_open() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let envelope =
            key_exchange(&alice, "alice", "bob", &bob.public_key(), &session).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::KeyExchange);
        assert!(envelope.nonce.is_none());

        let opened = open_key_exchange(&envelope, &bob, &alice.public_key()).unwrap();
        assert!(opened.ct_eq(&session));
    }

    #[test]
    fn test_key_exchange_requires_signature() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let mut envelope =
            key_exchange(&alice, "alice", "bob", &bob.public_key(), &session).unwrap();
        envelope.signature = None;
        assert_eq!(
            open_key_exchange(&envelope, &bob, &alice.public_key()).unwrap_err(),
            ExchangeError::MissingSignature
        );
    }

    #[test]
    fn test_key_exchange_from_impostor() {
        let alice = KeyPair::generate().unwrap();
        let mallory = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        // Signed by mallory, claiming to be alice.
        let envelope =
            key_exchange(&mallory, "alice", "bob", &bob.public_key(), &session).unwrap();
        assert_eq!(
            open_key_exchange(&envelope, &bob, &alice.public_key()).unwrap_err(),
            ExchangeError::BadSignature
        );
    }

    #[test]
    fn test_key_exchange_tampered_data() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let mut envelope =
            key_exchange(&alice, "alice", "bob", &bob.public_key(), &session).unwrap();
        envelope.data = encoding::encode([0u8; 92]);
        assert_eq!(
            open_key_exchange(&envelope, &bob, &alice.public_key()).unwrap_err(),
            ExchangeError::BadSignature
        );
    }

    #[test]
    fn test_key_exchange_restamped_fails() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let mut envelope =
            key_exchange(&alice, "alice", "bob", &bob.public_key(), &session).unwrap();
        envelope.sent_at = envelope.sent_at + chrono::Duration::hours(2);
        assert_eq!(
            open_key_exchange(&envelope, &bob, &alice.public_key()).unwrap_err(),
            ExchangeError::BadSignature
        );
    }

    #[test]
    fn test_message_seal_open() {
        let alice = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let envelope = seal_message(
            &alice,
            "alice",
            "bob",
            &session,
            b"hi",
            SignaturePolicy::KeyExchangeOnly,
        )
        .unwrap();
        assert!(envelope.signature.is_none());
        assert_eq!(open_message(&envelope, &session).unwrap(), b"hi");
    }

    #[test]
    fn test_message_signed_under_all_envelopes() {
        let alice = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let envelope = seal_message(
            &alice,
            "alice",
            "bob",
            &session,
            b"hi",
            SignaturePolicy::AllEnvelopes,
        )
        .unwrap();
        assert!(verify_signature(&envelope, &alice.public_key()));
    }

    #[test]
    fn test_message_redirected_fails() {
        let alice = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let mut envelope = seal_message(
            &alice,
            "alice",
            "bob",
            &session,
            b"hi",
            SignaturePolicy::KeyExchangeOnly,
        )
        .unwrap();
        envelope.recipient = "carol".into();
        assert!(open_message(&envelope, &session).is_err());
    }

    #[test]
    fn test_message_without_nonce_fails() {
        let alice = KeyPair::generate().unwrap();
        let session = SymmetricKey::generate().unwrap();

        let mut envelope = seal_message(
            &alice,
            "alice",
            "bob",
            &session,
            b"hi",
            SignaturePolicy::KeyExchangeOnly,
        )
        .unwrap();
        envelope.nonce = None;
        assert!(open_message(&envelope, &session).is_err());
    }
}
