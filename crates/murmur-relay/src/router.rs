//! Envelope routing.
//!
//! The router never looks inside `data`. Delivery is at most once: an
//! envelope is queued on the recipient's outbox or dropped, never retried.

use murmur_common::{normalize_name, DeliveryStatus, Envelope, EnvelopeKind, Outcome, ServerFrame};
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::RouteError;

/// Structural checks only.
pub fn validate(envelope: &Envelope) -> Result<(), RouteError> {
    if envelope.sender.trim().is_empty() {
        return Err(RouteError::MalformedEnvelope("missing sender"));
    }
    if envelope.recipient.trim().is_empty() {
        return Err(RouteError::MalformedEnvelope("missing recipient"));
    }
    if envelope.data.is_empty() {
        return Err(RouteError::MalformedEnvelope("missing data"));
    }
    if envelope.kind == EnvelopeKind::Message
        && envelope.nonce.as_deref().map_or(true, str::is_empty)
    {
        return Err(RouteError::MalformedEnvelope("message without nonce"));
    }
    Ok(())
}

/// Forwards envelopes between registered principals.
#[derive(Debug, Clone)]
pub struct Router {
    directory: Directory,
}

impl Router {
    /// A router delivering through `directory`.
    pub fn new(directory: Directory) -> Self {
        Self { directory }
    }

    /// Forward `envelope` to its recipient and report the outcome for the
    /// sender.
    pub async fn route(&self, envelope: Envelope) -> Result<DeliveryStatus, RouteError> {
        validate(&envelope)?;

        let sender = normalize_name(&envelope.sender);
        if !self.directory.contains(&sender).await {
            return Err(RouteError::UnauthenticatedSender(sender));
        }

        let recipient = normalize_name(&envelope.recipient);
        let envelope_id = envelope.id;
        let kind = envelope.kind;

        let outcome = match self.directory.handle(&recipient).await {
            Some(handle) => {
                if handle.try_send(ServerFrame::Envelope { envelope }) {
                    Outcome::Delivered
                } else {
                    warn!("outbox for {} is full or closed, dropping envelope", recipient);
                    Outcome::RecipientUnknown
                }
            }
            None => Outcome::RecipientUnknown,
        };

        match outcome {
            Outcome::Delivered => debug!(
                %envelope_id,
                kind = kind.as_str(),
                "routed {} -> {}",
                sender,
                recipient
            ),
            _ => info!(
                %envelope_id,
                kind = kind.as_str(),
                "{} -> {} failed: recipient unknown",
                sender,
                recipient
            ),
        }

        Ok(DeliveryStatus {
            envelope_id,
            recipient,
            outcome,
        })
    }
}
