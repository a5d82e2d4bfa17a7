//! Key exchange state machine.
//!
//! One instance per local principal, tracking every peer. It performs no
//! I/O: callers feed it received session keys and act on the returned
//! [`Offer`] outcome (send a confirmation, wake waiters, report).
//!
//! A peer is in exactly one state:
//! - **NoSession**: neither pending nor stored
//! - **Pending**: we sent a key and wait for it to be echoed back
//! - **Established**: a live key is in the [`SessionKeyStore`]
//!
//! Simultaneous establishment is resolved by name: the lexicographically
//! smaller name is the canonical initiator and its key wins.

use std::collections::HashMap;
use std::time::Duration;

use murmur_crypto::{CryptoError, SymmetricKey};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::store::SessionKeyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Pending,
    Established,
}

/// What happened when a peer's session key arrived.
#[derive(Debug)]
pub enum Offer {
    /// The peer echoed our pending key. Established, nothing to send.
    Confirmed,
    /// We took the peer's key and must confirm it by wrapping it back.
    Adopted(SymmetricKey),
    /// The key is already established.
    Duplicate,
    /// A competing key lost the tie-break; our exchange stays pending.
    KeptOwn,
}

#[derive(Debug)]
struct PendingExchange {
    key: SymmetricKey,
    deadline: Instant,
}

/// The smaller of two normalized names.
pub fn canonical_initiator<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a <= b {
        a
    } else {
        b
    }
}

#[derive(Debug)]
pub struct KeyExchange {
    local: String,
    store: SessionKeyStore,
    pending: HashMap<String, PendingExchange>,
    session_ttl: Duration,
    exchange_timeout: Duration,
}

impl KeyExchange {
    pub fn new(local: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            local: local.into(),
            store: SessionKeyStore::with_grace(config.exchange_timeout),
            pending: HashMap::new(),
            session_ttl: config.session_ttl,
            exchange_timeout: config.exchange_timeout,
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn state(&mut self, peer: &str) -> SessionState {
        self.expire_pending(peer);
        if self.pending.contains_key(peer) {
            SessionState::Pending
        } else if self.store.get(peer).is_some() {
            SessionState::Established
        } else {
            SessionState::NoSession
        }
    }

    /// The established key for `peer`, if any.
    pub fn session_key(&mut self, peer: &str) -> Option<SymmetricKey> {
        self.store.get(peer)
    }

    /// The established key for `peer`, or one that expired less than an
    /// exchange timeout ago. Used to open inbound messages only.
    pub fn recent_key(&mut self, peer: &str) -> Option<SymmetricKey> {
        self.store.get_recent(peer)
    }

    /// The key we offered `peer` and are still waiting on.
    pub fn pending_key(&mut self, peer: &str) -> Option<SymmetricKey> {
        self.expire_pending(peer);
        self.pending.get(peer).map(|p| p.key.clone())
    }

    /// Start a new exchange with a fresh key, replacing any established or
    /// pending session. The caller wraps and sends the returned key.
    pub fn initiate(&mut self, peer: &str) -> Result<SymmetricKey, CryptoError> {
        let key = SymmetricKey::generate()?;
        self.store.invalidate(peer);
        self.pending.insert(
            peer.to_string(),
            PendingExchange {
                key: key.clone(),
                deadline: Instant::now() + self.exchange_timeout,
            },
        );
        Ok(key)
    }

    /// Handle a verified session key received from `peer`.
    pub fn receive(&mut self, peer: &str, key: SymmetricKey) -> Offer {
        self.expire_pending(peer);

        if let Some(pending) = self.pending.get(peer) {
            if pending.key.ct_eq(&key) {
                self.pending.remove(peer);
                self.store.put(peer, key, self.session_ttl);
                return Offer::Confirmed;
            }
            if canonical_initiator(&self.local, peer) == self.local {
                return Offer::KeptOwn;
            }
            self.pending.remove(peer);
            self.store.put(peer, key.clone(), self.session_ttl);
            return Offer::Adopted(key);
        }

        if let Some(existing) = self.store.get(peer) {
            if existing.ct_eq(&key) {
                return Offer::Duplicate;
            }
        }

        self.store.put(peer, key.clone(), self.session_ttl);
        Offer::Adopted(key)
    }

    /// Revert a pending exchange to NoSession. Returns whether one existed.
    pub fn abandon(&mut self, peer: &str) -> bool {
        self.pending.remove(peer).is_some()
    }

    /// Forget everything about `peer`.
    pub fn invalidate(&mut self, peer: &str) -> bool {
        let pending = self.pending.remove(peer).is_some();
        let stored = self.store.invalidate(peer);
        pending || stored
    }

    /// Evict expired session keys and timed-out exchanges.
    pub fn sweep(&mut self) -> Vec<String> {
        let now = Instant::now();
        let mut evicted = self.store.sweep();
        self.pending.retain(|peer, p| {
            if now >= p.deadline {
                evicted.push(peer.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    fn expire_pending(&mut self, peer: &str) {
        let now = Instant::now();
        if matches!(self.pending.get(peer), Some(p) if now >= p.deadline) {
            self.pending.remove(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(name: &str) -> KeyExchange {
        KeyExchange::new(name, &ClientConfig::default())
    }

    #[test]
    fn test_canonical_initiator() {
        assert_eq!(canonical_initiator("alice", "bob"), "alice");
        assert_eq!(canonical_initiator("bob", "alice"), "alice");
    }

    #[test]
    fn test_initiate_then_confirm() {
        let mut alice = exchange("alice");
        let mut bob = exchange("bob");

        let key = alice.initiate("bob").unwrap();
        assert_eq!(alice.state("bob"), SessionState::Pending);

        let confirm = match bob.receive("alice", key.clone()) {
            Offer::Adopted(k) => k,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(bob.state("alice"), SessionState::Established);

        assert!(matches!(alice.receive("bob", confirm), Offer::Confirmed));
        assert_eq!(alice.state("bob"), SessionState::Established);
        assert!(alice.session_key("bob").unwrap().ct_eq(&key));
        assert!(bob.session_key("alice").unwrap().ct_eq(&key));
    }

    #[test]
    fn test_confirmation_is_not_echoed_again() {
        let mut alice = exchange("alice");
        let mut bob = exchange("bob");

        let key = alice.initiate("bob").unwrap();
        bob.receive("alice", key.clone());
        alice.receive("bob", key.clone());

        // A late duplicate must not trigger another confirmation.
        assert!(matches!(bob.receive("alice", key.clone()), Offer::Duplicate));
        assert!(matches!(alice.receive("bob", key), Offer::Duplicate));
    }

    #[test]
    fn test_simultaneous_initiation_converges() {
        let mut alice = exchange("alice");
        let mut bob = exchange("bob");

        let alice_key = alice.initiate("bob").unwrap();
        let bob_key = bob.initiate("alice").unwrap();

        // Both offers cross in flight.
        assert!(matches!(alice.receive("bob", bob_key), Offer::KeptOwn));
        assert_eq!(alice.state("bob"), SessionState::Pending);

        let confirm = match bob.receive("alice", alice_key.clone()) {
            Offer::Adopted(k) => k,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(matches!(alice.receive("bob", confirm), Offer::Confirmed));

        let a = alice.session_key("bob").unwrap();
        let b = bob.session_key("alice").unwrap();
        assert!(a.ct_eq(&b));
        assert!(a.ct_eq(&alice_key));
    }

    #[test]
    fn test_renegotiation_replaces_established_key() {
        let mut alice = exchange("alice");
        let mut bob = exchange("bob");

        let first = alice.initiate("bob").unwrap();
        bob.receive("alice", first.clone());
        alice.receive("bob", first);

        let second = bob.initiate("alice").unwrap();
        match alice.receive("bob", second.clone()) {
            Offer::Adopted(k) => assert!(k.ct_eq(&second)),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(bob.receive("alice", second.clone()), Offer::Confirmed));
        assert!(alice.session_key("bob").unwrap().ct_eq(&second));
    }

    #[test]
    fn test_pending_times_out() {
        let config = ClientConfig {
            exchange_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut alice = KeyExchange::new("alice", &config);
        alice.initiate("bob").unwrap();
        assert_eq!(alice.state("bob"), SessionState::NoSession);
    }

    #[test]
    fn test_late_confirmation_after_timeout_is_adopted() {
        let config = ClientConfig {
            exchange_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut alice = KeyExchange::new("alice", &config);
        let key = alice.initiate("bob").unwrap();

        assert!(matches!(alice.receive("bob", key), Offer::Adopted(_)));
        assert_eq!(alice.state("bob"), SessionState::Established);
    }

    #[test]
    fn test_zero_ttl_session_is_absent() {
        let config = ClientConfig {
            session_ttl: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut bob = KeyExchange::new("bob", &config);
        bob.receive("alice", SymmetricKey::generate().unwrap());
        assert!(bob.session_key("alice").is_none());
        assert_eq!(bob.state("alice"), SessionState::NoSession);
    }

    #[test]
    fn test_recent_key_survives_expiry() {
        let config = ClientConfig {
            session_ttl: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut bob = KeyExchange::new("bob", &config);
        let key = SymmetricKey::generate().unwrap();
        bob.receive("alice", key.clone());

        assert!(bob.session_key("alice").is_none());
        assert!(bob.recent_key("alice").unwrap().ct_eq(&key));
    }

    #[test]
    fn test_pending_key_visible_until_confirmed() {
        let mut alice = exchange("alice");
        let key = alice.initiate("bob").unwrap();
        assert!(alice.pending_key("bob").unwrap().ct_eq(&key));

        alice.receive("bob", key);
        assert!(alice.pending_key("bob").is_none());
    }

    #[test]
    fn test_abandon_and_invalidate() {
        let mut alice = exchange("alice");
        alice.initiate("bob").unwrap();
        assert!(alice.abandon("bob"));
        assert!(!alice.abandon("bob"));
        assert_eq!(alice.state("bob"), SessionState::NoSession);

        alice.receive("carol", SymmetricKey::generate().unwrap());
        assert!(alice.invalidate("carol"));
        assert_eq!(alice.state("carol"), SessionState::NoSession);
    }

    #[test]
    fn test_initiate_drops_established_key() {
        let mut alice = exchange("alice");
        alice.receive("bob", SymmetricKey::generate().unwrap());
        alice.initiate("bob").unwrap();
        assert!(alice.session_key("bob").is_none());
        assert_eq!(alice.state("bob"), SessionState::Pending);
    }

    #[test]
    fn test_sweep_reports_evictions() {
        let config = ClientConfig {
            session_ttl: Duration::ZERO,
            exchange_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut alice = KeyExchange::new("alice", &config);
        alice.receive("bob", SymmetricKey::generate().unwrap());
        alice.initiate("carol").unwrap();

        let mut evicted = alice.sweep();
        evicted.sort();
        assert_eq!(evicted, vec!["bob".to_string(), "carol".to_string()]);
    }
}
