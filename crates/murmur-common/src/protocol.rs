//! Wire protocol shared by the relay and its clients.
//!
//! Every frame is a JSON text frame of the form
//! `{"type": "<snake_case>", "payload": {...}}`. Binary material (nonces,
//! ciphertext, wrapped keys, signatures, public keys) travels as standard
//! base64 strings and is never interpreted by the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// A session key wrapped to the recipient's public key.
    KeyExchange,
    /// An AEAD-encrypted message under an established session key.
    Message,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::KeyExchange => "key_exchange",
            EnvelopeKind::Message => "message",
        }
    }
}

/// Opaque container routed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub kind: EnvelopeKind,
    pub sender: String,
    pub recipient: String,
    /// Base64 AEAD nonce. Required for [`EnvelopeKind::Message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Base64 ciphertext or wrapped key.
    pub data: String,
    /// Base64 Ed25519 signature over the envelope's signing bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Result of routing (or, for `DecryptionFailed`, of opening) an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Delivered,
    RecipientUnknown,
    /// Produced locally by the receiving client only. The relay never
    /// learns that a message failed to authenticate.
    DecryptionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub envelope_id: Uuid,
    pub recipient: String,
    pub outcome: Outcome,
}

/// Why the relay refused a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DuplicateIdentity,
    MalformedKey,
    InvalidName,
    Unauthenticated,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RejectReason::DuplicateIdentity => "name is already in use",
            RejectReason::MalformedKey => "public key is malformed",
            RejectReason::InvalidName => "name is not valid",
            RejectReason::Unauthenticated => "registration required",
        };
        f.write_str(text)
    }
}

/// Entry of the active-principal broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalInfo {
    pub name: String,
    pub public_key: String,
}

/// Frames sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Register { name: String, public_key: String },
    Send { envelope: Envelope },
}

/// Frames sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Accepted { name: String },
    Rejected { reason: RejectReason },
    Principals { principals: Vec<PrincipalInfo> },
    Envelope { envelope: Envelope },
    Status(DeliveryStatus),
    Error { message: String },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Body of `GET /public-key/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    pub name: String,
    pub public_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            kind: EnvelopeKind::Message,
            sender: "alice".into(),
            recipient: "bob".into(),
            nonce: Some("AAAAAAAAAAAAAAAA".into()),
            data: "c2VjcmV0".into(),
            signature: None,
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_client_frame_shape() {
        let frame = ClientFrame::Register {
            name: "alice".into(),
            public_key: "pk".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["payload"]["name"], "alice");
    }

    #[test]
    fn test_envelope_kind_wire_names() {
        let mut envelope = sample_envelope();
        envelope.kind = EnvelopeKind::KeyExchange;
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "key_exchange");
        assert_eq!(EnvelopeKind::KeyExchange.as_str(), "key_exchange");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let mut envelope = sample_envelope();
        envelope.nonce = None;
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("nonce").is_none());
        assert!(json.get("signature").is_none());
    }

    #[test]
    fn test_status_frame_decodes() {
        let text = r#"{"type":"status","payload":{"envelope_id":"8f9c2f1e-4f4b-4d55-9b7e-3c1d2b0a9e11","recipient":"bob","outcome":"recipient_unknown"}}"#;
        match ServerFrame::decode(text).unwrap() {
            ServerFrame::Status(status) => {
                assert_eq!(status.outcome, Outcome::RecipientUnknown);
                assert_eq!(status.recipient, "bob");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_reject_reason_wire_name() {
        let frame = ServerFrame::Rejected {
            reason: RejectReason::DuplicateIdentity,
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["payload"]["reason"], "duplicate_identity");
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let err = ClientFrame::decode("{not json").unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
    }
}
