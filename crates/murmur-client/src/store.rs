//! Per-principal session key cache.
//!
//! Expiry is checked lazily on every read; [`SessionKeyStore::sweep`] is only
//! needed to bound memory when peers go quiet.
//!
//! An expired key is never handed out for sending. For `grace` after expiry
//! it can still be read with [`SessionKeyStore::get_recent`] to open
//! messages the peer sealed just before its own copy expired, since the two
//! copies are stored about one round trip apart.

use std::collections::HashMap;
use std::time::Duration;

use murmur_crypto::SymmetricKey;
use tokio::time::Instant;

/// A cached session key and its lifetime.
#[derive(Debug, Clone)]
pub struct SessionKey {
    pub key: SymmetricKey,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl SessionKey {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn is_past_grace(&self, now: Instant, grace: Duration) -> bool {
        now >= self.expires_at + grace
    }
}

#[derive(Debug, Default)]
pub struct SessionKeyStore {
    entries: HashMap<String, SessionKey>,
    grace: Duration,
}

impl SessionKeyStore {
    /// A store without a grace period.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps expired keys readable by
    /// [`get_recent`](Self::get_recent) for `grace`.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            grace,
        }
    }

    /// The live key for `peer`. Absent and expired entries both read as `None`.
    pub fn get(&mut self, peer: &str) -> Option<SymmetricKey> {
        let now = Instant::now();
        match self.entries.get(peer) {
            Some(entry) if !entry.is_expired(now) => Some(entry.key.clone()),
            Some(entry) => {
                if entry.is_past_grace(now, self.grace) {
                    self.entries.remove(peer);
                }
                None
            }
            None => None,
        }
    }

    /// The key for `peer` if it is live or expired less than `grace` ago.
    /// Only for opening inbound messages.
    pub fn get_recent(&mut self, peer: &str) -> Option<SymmetricKey> {
        let now = Instant::now();
        match self.entries.get(peer) {
            Some(entry) if !entry.is_past_grace(now, self.grace) => Some(entry.key.clone()),
            Some(_) => {
                self.entries.remove(peer);
                None
            }
            None => None,
        }
    }

    /// Store `key` for `peer`, replacing any previous entry.
    pub fn put(&mut self, peer: &str, key: SymmetricKey, ttl: Duration) {
        let now = Instant::now();
        self.entries.insert(
            peer.to_string(),
            SessionKey {
                key,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Returns whether an entry was removed.
    pub fn invalidate(&mut self, peer: &str) -> bool {
        self.entries.remove(peer).is_some()
    }

    /// Drop every entry past its grace period and return the evicted peers.
    pub fn sweep(&mut self) -> Vec<String> {
        let now = Instant::now();
        let grace = self.grace;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_past_grace(now, grace))
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &expired {
            self.entries.remove(peer);
        }
        expired
    }

    /// Number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_put_get() {
        let mut store = SessionKeyStore::new();
        store.put("bob", key(1), Duration::from_secs(60));
        assert!(store.get("bob").unwrap().ct_eq(&key(1)));
        assert!(store.get("carol").is_none());
    }

    #[test]
    fn test_zero_ttl_is_absent() {
        let mut store = SessionKeyStore::new();
        store.put("bob", key(1), Duration::ZERO);
        assert!(store.get("bob").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_replaces() {
        let mut store = SessionKeyStore::new();
        store.put("bob", key(1), Duration::from_secs(60));
        store.put("bob", key(2), Duration::from_secs(60));
        assert!(store.get("bob").unwrap().ct_eq(&key(2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let mut store = SessionKeyStore::new();
        store.put("bob", key(1), Duration::from_secs(60));
        assert!(store.invalidate("bob"));
        assert!(!store.invalidate("bob"));
        assert!(store.get("bob").is_none());
    }

    #[test]
    fn test_expired_key_readable_during_grace() {
        let mut store = SessionKeyStore::with_grace(Duration::from_secs(60));
        store.put("bob", key(1), Duration::ZERO);

        assert!(store.get("bob").is_none());
        assert!(store.get_recent("bob").unwrap().ct_eq(&key(1)));
        assert!(store.sweep().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_no_grace_drops_expired_key() {
        let mut store = SessionKeyStore::new();
        store.put("bob", key(1), Duration::ZERO);
        assert!(store.get_recent("bob").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep() {
        let mut store = SessionKeyStore::new();
        store.put("bob", key(1), Duration::ZERO);
        store.put("carol", key(2), Duration::from_secs(60));

        assert_eq!(store.sweep(), vec!["bob".to_string()]);
        assert_eq!(store.len(), 1);
        assert!(store.get("carol").is_some());
    }
}
