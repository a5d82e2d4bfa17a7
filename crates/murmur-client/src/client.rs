//! Asynchronous end-to-end encrypted client.
//!
//! Locking rules:
//! - `exchange`, `replay`, `peers` and `known_keys` are `parking_lot`
//!   mutexes and are never held across an `.await`
//! - each peer has a `tokio` gate serializing outbound establishment and
//!   sends to that peer; different peers proceed in parallel
//! - waiters learn about state changes for a peer through its `watch`
//!   generation counter
//!
//! Inbound frames must be processed concurrently with [`Client::send`],
//! since a send may be waiting for a confirmation that only the inbound
//! path can observe. [`Client::spawn_inbound`] does that.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use murmur_common::{
    is_valid_name, normalize_name, DeliveryStatus, Envelope, EnvelopeKind, Outcome,
    PrincipalInfo, ServerFrame,
};
use murmur_crypto::{KeyPair, PublicKey, SymmetricKey};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, SignaturePolicy};
use crate::envelope;
use crate::error::{ClientError, ExchangeError};
use crate::exchange::{KeyExchange, Offer, SessionState};
use crate::replay::ReplayGuard;
use crate::transport::Transport;

/// Everything the application needs to show its user.
#[derive(Debug)]
pub enum ClientEvent {
    Message {
        from: String,
        envelope_id: Uuid,
        plaintext: Vec<u8>,
    },
    SessionEstablished {
        peer: String,
    },
    ExchangeFailed {
        peer: String,
        reason: ExchangeError,
    },
    /// A message that did not authenticate. Only ever reported locally.
    Undecryptable {
        from: String,
        status: DeliveryStatus,
    },
    Delivery(DeliveryStatus),
    Principals(Vec<String>),
    RelayError(String),
}

struct PeerSlot {
    gate: tokio::sync::Mutex<()>,
    generation: watch::Sender<u64>,
}

impl PeerSlot {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            gate: tokio::sync::Mutex::new(()),
            generation,
        }
    }
}

struct Inner<T> {
    name: String,
    identity: KeyPair,
    config: ClientConfig,
    transport: T,
    exchange: Mutex<KeyExchange>,
    replay: Mutex<ReplayGuard>,
    peers: Mutex<HashMap<String, Arc<PeerSlot>>>,
    known_keys: Mutex<HashMap<String, PublicKey>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

pub struct Client<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Client<T> {
    /// Create a client for the registered principal `name`.
    ///
    /// Events are buffered without bound; the application is expected to
    /// drain the returned receiver.
    pub fn new(
        name: &str,
        identity: KeyPair,
        config: ClientConfig,
        transport: T,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let name = normalize_name(name);
        if !is_valid_name(&name) {
            return Err(ClientError::InvalidName(name));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let exchange = KeyExchange::new(name.clone(), &config);
        let replay = ReplayGuard::new(config.replay_window);

        let client = Self {
            inner: Arc::new(Inner {
                name,
                identity,
                config,
                transport,
                exchange: Mutex::new(exchange),
                replay: Mutex::new(replay),
                peers: Mutex::new(HashMap::new()),
                known_keys: Mutex::new(HashMap::new()),
                events: events_tx,
            }),
        };
        Ok((client, events_rx))
    }

    /// The normalized name this client is registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Public half of this client's identity.
    pub fn public_key(&self) -> PublicKey {
        self.inner.identity.public_key()
    }

    /// Where the exchange with `peer` currently stands.
    pub fn session_state(&self, peer: &str) -> SessionState {
        self.inner.exchange.lock().state(&normalize_name(peer))
    }

    /// Current session key with `peer`, if established.
    pub fn session_key(&self, peer: &str) -> Option<SymmetricKey> {
        self.inner.exchange.lock().session_key(&normalize_name(peer))
    }

    /// Process relay frames on a background task until the stream ends.
    pub fn spawn_inbound(&self, mut frames: mpsc::Receiver<ServerFrame>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                client.handle_frame(frame).await;
            }
            debug!("inbound frame stream ended");
        })
    }

    /// Encrypt `plaintext` for `peer` and hand it to the relay.
    ///
    /// Establishes a session first if needed. A failed exchange is retried
    /// once before `SessionEstablishmentFailed` is returned; an unknown peer
    /// fails immediately.
    pub async fn send(&self, peer: &str, plaintext: &[u8]) -> Result<Uuid, ClientError> {
        let peer = checked_peer(peer)?;
        let slot = self.slot(&peer);
        let _gate = slot.gate.lock().await;

        let mut last_error = ExchangeError::Aborted;
        for attempt in 1..=2 {
            let existing = self.inner.exchange.lock().session_key(&peer);
            let key = match existing {
                Some(key) => key,
                None => match self.establish(&peer, &slot).await {
                    Ok(key) => key,
                    Err(ExchangeError::PeerNotFound) => {
                        return Err(ClientError::PeerNotFound(peer));
                    }
                    Err(err) => {
                        warn!(peer = %peer, attempt, "key exchange failed: {}", err);
                        last_error = err;
                        continue;
                    }
                },
            };

            let envelope = envelope::seal_message(
                &self.inner.identity,
                &self.inner.name,
                &peer,
                &key,
                plaintext,
                self.inner.config.signature_policy,
            )?;
            let id = envelope.id;
            self.inner.transport.send_envelope(envelope).await?;
            debug!(peer = %peer, envelope_id = %id, "message sent");
            return Ok(id);
        }

        Err(ClientError::SessionEstablishmentFailed {
            peer,
            reason: last_error,
        })
    }

    /// Drop the current session with `peer` and negotiate a new one.
    pub async fn rekey(&self, peer: &str) -> Result<(), ClientError> {
        let peer = checked_peer(peer)?;
        let slot = self.slot(&peer);
        let _gate = slot.gate.lock().await;

        self.inner.exchange.lock().invalidate(&peer);
        self.notify(&peer);

        match self.establish(&peer, &slot).await {
            Ok(_) => Ok(()),
            Err(ExchangeError::PeerNotFound) => Err(ClientError::PeerNotFound(peer)),
            Err(reason) => Err(ClientError::SessionEstablishmentFailed { peer, reason }),
        }
    }

    /// Evict expired keys and timed-out exchanges. Returns how many peers
    /// were affected.
    pub fn sweep(&self) -> usize {
        let evicted = self.inner.exchange.lock().sweep();
        for peer in &evicted {
            self.notify(peer);
        }
        evicted.len()
    }

    /// Process one frame pushed by the relay.
    pub async fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Envelope { envelope } => self.handle_envelope(envelope).await,
            ServerFrame::Status(status) => {
                if status.outcome == Outcome::RecipientUnknown {
                    info!(recipient = %status.recipient, "recipient unknown");
                }
                self.emit(ClientEvent::Delivery(status));
            }
            ServerFrame::Principals { principals } => self.apply_principals(principals),
            ServerFrame::Error { message } => {
                warn!("relay error: {}", message);
                self.emit(ClientEvent::RelayError(message));
            }
            ServerFrame::Accepted { .. } | ServerFrame::Rejected { .. } => {
                debug!("ignoring registration frame after connect");
            }
        }
    }

    /// Run one exchange with `peer` and wait for it to settle.
    ///
    /// Caller holds the peer's gate.
    async fn establish(&self, peer: &str, slot: &PeerSlot) -> Result<SymmetricKey, ExchangeError> {
        let peer_key = self.fetch_key(peer).await?;

        let mut generation = slot.generation.subscribe();
        let deadline = Instant::now() + self.inner.config.exchange_timeout;
        let key = {
            let mut exchange = self.inner.exchange.lock();
            // The peer's own offer may have been adopted during the lookup.
            if let Some(established) = exchange.session_key(peer) {
                return Ok(established);
            }
            exchange.initiate(peer)?
        };

        let offer =
            envelope::key_exchange(&self.inner.identity, &self.inner.name, peer, &peer_key, &key)?;
        if let Err(err) = self.inner.transport.send_envelope(offer).await {
            self.inner.exchange.lock().abandon(peer);
            return Err(ExchangeError::Transport(err.to_string()));
        }
        debug!(peer, "key exchange sent");

        loop {
            {
                let mut exchange = self.inner.exchange.lock();
                if let Some(established) = exchange.session_key(peer) {
                    return Ok(established);
                }
                if exchange.state(peer) != SessionState::Pending {
                    return Err(if Instant::now() >= deadline {
                        ExchangeError::Timeout
                    } else {
                        ExchangeError::Aborted
                    });
                }
            }

            match timeout_at(deadline, generation.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(ExchangeError::Aborted),
                Err(_) => {
                    self.inner.exchange.lock().abandon(peer);
                    return Err(ExchangeError::Timeout);
                }
            }
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        if normalize_name(&envelope.recipient) != self.inner.name {
            warn!(envelope_id = %envelope.id, "dropping envelope addressed to someone else");
            return;
        }
        let sender = normalize_name(&envelope.sender);
        if !is_valid_name(&sender) {
            warn!(envelope_id = %envelope.id, "dropping envelope with invalid sender");
            return;
        }

        match envelope.kind {
            EnvelopeKind::KeyExchange => self.handle_key_exchange(&sender, &envelope).await,
            EnvelopeKind::Message => self.handle_message(&sender, &envelope).await,
        }
    }

    async fn handle_key_exchange(&self, sender: &str, envelope: &Envelope) {
        let fresh = self
            .inner
            .replay
            .lock()
            .check(envelope.id, envelope.sent_at, Utc::now());
        if let Err(reason) = fresh {
            self.reject_exchange(sender, reason);
            return;
        }

        let opened = match self.fetch_key(sender).await {
            Ok(sender_key) => {
                envelope::open_key_exchange(envelope, &self.inner.identity, &sender_key)
                    .map(|key| (sender_key, key))
            }
            Err(err) => Err(err),
        };
        // Ids are recorded only once the signature has verified.
        let opened = opened.and_then(|opened| {
            self.inner
                .replay
                .lock()
                .check_and_update(envelope.id, envelope.sent_at, Utc::now())
                .map(|()| opened)
        });
        let (sender_key, key) = match opened {
            Ok(opened) => opened,
            Err(reason) => {
                self.reject_exchange(sender, reason);
                return;
            }
        };

        let offer = self.inner.exchange.lock().receive(sender, key);
        match offer {
            Offer::Confirmed => {
                info!(peer = sender, "session established");
                self.notify(sender);
                self.emit(ClientEvent::SessionEstablished {
                    peer: sender.to_string(),
                });
            }
            Offer::Adopted(key) => {
                info!(peer = sender, "session established by peer");

                // The confirmation must be queued before local senders
                // wake, so it reaches the peer ahead of our first message.
                let confirm = envelope::key_exchange(
                    &self.inner.identity,
                    &self.inner.name,
                    sender,
                    &sender_key,
                    &key,
                );
                match confirm {
                    Ok(confirm) => {
                        if let Err(err) = self.inner.transport.send_envelope(confirm).await {
                            warn!(peer = sender, "failed to send confirmation: {}", err);
                        }
                    }
                    Err(err) => warn!(peer = sender, "failed to build confirmation: {}", err),
                }

                self.notify(sender);
                self.emit(ClientEvent::SessionEstablished {
                    peer: sender.to_string(),
                });
            }
            Offer::Duplicate => debug!(peer = sender, "duplicate key exchange ignored"),
            Offer::KeptOwn => debug!(peer = sender, "competing key exchange lost tie-break"),
        }
    }

    fn reject_exchange(&self, sender: &str, reason: ExchangeError) {
        warn!(peer = sender, "rejected key exchange: {}", reason);
        self.emit(ClientEvent::ExchangeFailed {
            peer: sender.to_string(),
            reason,
        });
    }

    async fn handle_message(&self, sender: &str, envelope: &Envelope) {
        match self.open_message(sender, envelope).await {
            Some(plaintext) => self.emit(ClientEvent::Message {
                from: sender.to_string(),
                envelope_id: envelope.id,
                plaintext,
            }),
            None => {
                warn!(peer = sender, envelope_id = %envelope.id, "message failed to decrypt");
                self.emit(ClientEvent::Undecryptable {
                    from: sender.to_string(),
                    status: DeliveryStatus {
                        envelope_id: envelope.id,
                        recipient: self.inner.name.clone(),
                        outcome: Outcome::DecryptionFailed,
                    },
                });
            }
        }
    }

    async fn open_message(&self, sender: &str, envelope: &Envelope) -> Option<Vec<u8>> {
        let requires_signature = self.inner.config.signature_policy
            == SignaturePolicy::AllEnvelopes
            || envelope.signature.is_some();
        if requires_signature {
            let cached = self.inner.known_keys.lock().get(sender).cloned();
            let sender_key = match cached {
                Some(key) => key,
                None => self.fetch_key(sender).await.ok()?,
            };
            if !envelope::verify_signature(envelope, &sender_key) {
                return None;
            }
        }

        let (established, pending) = {
            let mut exchange = self.inner.exchange.lock();
            (exchange.recent_key(sender), exchange.pending_key(sender))
        };

        if let Some(session) = established {
            if let Ok(plaintext) = envelope::open_message(envelope, &session) {
                return Some(plaintext);
            }
        }

        // A message under our pending key means the peer adopted it and its
        // confirmation is still in flight.
        let pending = pending?;
        let plaintext = envelope::open_message(envelope, &pending).ok()?;
        let offer = self.inner.exchange.lock().receive(sender, pending);
        if matches!(offer, Offer::Confirmed) {
            info!(peer = sender, "session established");
            self.notify(sender);
            self.emit(ClientEvent::SessionEstablished {
                peer: sender.to_string(),
            });
        }
        Some(plaintext)
    }

    /// Fresh directory lookup of `peer`'s key.
    async fn fetch_key(&self, peer: &str) -> Result<PublicKey, ExchangeError> {
        let text = self
            .inner
            .transport
            .lookup(peer)
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?
            .ok_or(ExchangeError::PeerNotFound)?;
        let key = PublicKey::import(&text).map_err(|_| ExchangeError::PeerKeyInvalid)?;
        self.remember_key(peer, key.clone());
        Ok(key)
    }

    fn remember_key(&self, peer: &str, key: PublicKey) {
        let previous = self
            .inner
            .known_keys
            .lock()
            .insert(peer.to_string(), key.clone());
        if matches!(previous, Some(old) if old != key) {
            info!(peer, "peer key changed, dropping session");
            self.inner.exchange.lock().invalidate(peer);
            self.notify(peer);
        }
    }

    /// Replace the known keys with the relay's list. Sessions with peers that
    /// left or changed key are dropped, and so are idle slots of departed
    /// peers.
    fn apply_principals(&self, principals: Vec<PrincipalInfo>) {
        let mut incoming = HashMap::with_capacity(principals.len());
        for principal in &principals {
            match PublicKey::import(&principal.public_key) {
                Ok(key) => {
                    incoming.insert(normalize_name(&principal.name), key);
                }
                Err(_) => warn!(peer = %principal.name, "ignoring malformed published key"),
            }
        }

        let stale: Vec<String> = {
            let mut known = self.inner.known_keys.lock();
            let stale = known
                .iter()
                .filter(|(name, key)| incoming.get(name.as_str()) != Some(*key))
                .map(|(name, _)| name.clone())
                .collect();
            *known = incoming.clone();
            stale
        };

        for peer in &stale {
            let dropped = self.inner.exchange.lock().invalidate(peer);
            if dropped {
                info!(peer = %peer, "directory changed, dropping session");
            }
            self.notify(peer);
        }

        // A slot held elsewhere belongs to a send or rekey in progress.
        self.inner.peers.lock().retain(|peer, slot| {
            incoming.contains_key(peer) || Arc::strong_count(slot) > 1
        });

        let mut names: Vec<String> = principals.into_iter().map(|p| p.name).collect();
        names.sort();
        self.emit(ClientEvent::Principals(names));
    }

    fn slot(&self, peer: &str) -> Arc<PeerSlot> {
        self.inner
            .peers
            .lock()
            .entry(peer.to_string())
            .or_insert_with(|| Arc::new(PeerSlot::new()))
            .clone()
    }

    /// Wake anyone waiting on `peer`. Without a slot nobody is waiting.
    fn notify(&self, peer: &str) {
        let slot = self.inner.peers.lock().get(peer).cloned();
        if let Some(slot) = slot {
            slot.generation
                .send_modify(|generation| *generation = generation.wrapping_add(1));
        }
    }

    #[cfg(test)]
    fn tracked_peers(&self) -> usize {
        self.inner.peers.lock().len()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.inner.events.send(event);
    }
}

fn checked_peer(peer: &str) -> Result<String, ClientError> {
    let peer = normalize_name(peer);
    if is_valid_name(&peer) {
        Ok(peer)
    } else {
        Err(ClientError::InvalidName(peer))
    }
}
