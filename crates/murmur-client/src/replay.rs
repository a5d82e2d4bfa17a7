//! Replay protection for key-exchange envelopes.
//!
//! A key exchange is accepted only if its signed `sent_at` lies within
//! `window` of the local clock and its id has not been accepted before.
//! Ids are remembered only while they are inside the window; anything older
//! already fails the freshness check.
//!
//! Not thread-safe. The client keeps it behind a mutex.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ExchangeError;

pub const DEFAULT_REPLAY_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct ReplayGuard {
    window: chrono::Duration,
    seen: HashMap<Uuid, DateTime<Utc>>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_REPLAY_WINDOW_SECS))
    }
}

impl ReplayGuard {
    /// A guard accepting envelopes stamped at most `window` away from now,
    /// in either direction.
    pub fn new(window: Duration) -> Self {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::weeks(52));
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Check an envelope without recording it.
    pub fn check(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ExchangeError> {
        let age = now.signed_duration_since(sent_at);
        if age > self.window || -age > self.window {
            return Err(ExchangeError::Stale);
        }
        if self.seen.contains_key(&id) {
            return Err(ExchangeError::Replayed);
        }
        Ok(())
    }

    /// Check an envelope and remember its id on success.
    pub fn check_and_update(
        &mut self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ExchangeError> {
        self.prune(now);
        self.check(id, sent_at, now)?;
        self.seen.insert(id, sent_at);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget ids that would fail the freshness check anyway.
    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.seen
            .retain(|_, sent_at| now.signed_duration_since(*sent_at) <= window);
    }
}
