use std::time::Duration;

use murmur_common::Error;

use crate::replay::DEFAULT_REPLAY_WINDOW_SECS;

pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 10;

/// Which envelopes carry an Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    /// Only `key_exchange` envelopes are signed. Messages are authenticated
    /// by the session key alone.
    #[default]
    KeyExchangeOnly,
    /// Every envelope is signed and unsigned messages are refused.
    AllEnvelopes,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Lifetime of a negotiated session key.
    pub session_ttl: Duration,
    /// How long a pending exchange waits for the peer's confirmation.
    pub exchange_timeout: Duration,
    /// Maximum distance between a key exchange's `sent_at` and the local
    /// clock. Also bounds how long accepted envelope ids are remembered.
    pub replay_window: Duration,
    pub signature_policy: SignaturePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            exchange_timeout: Duration::from_secs(DEFAULT_EXCHANGE_TIMEOUT_SECS),
            replay_window: Duration::from_secs(DEFAULT_REPLAY_WINDOW_SECS),
            signature_policy: SignaturePolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `MURMUR_SESSION_TTL_SECS`,
    /// `MURMUR_EXCHANGE_TIMEOUT_SECS`, `MURMUR_REPLAY_WINDOW_SECS` and
    /// `MURMUR_SIGN_MESSAGES`.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(secs) = env_secs("MURMUR_SESSION_TTL_SECS")? {
            config.session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("MURMUR_EXCHANGE_TIMEOUT_SECS")? {
            config.exchange_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("MURMUR_REPLAY_WINDOW_SECS")? {
            config.replay_window = Duration::from_secs(secs);
        }
        if env_bool("MURMUR_SIGN_MESSAGES", false) {
            config.signature_policy = SignaturePolicy::AllEnvelopes;
        }

        Ok(config)
    }
}

fn env_secs(name: &str) -> Result<Option<u64>, Error> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::config(format!("{name} must be a whole number of seconds"))),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.exchange_timeout, Duration::from_secs(10));
        assert_eq!(config.replay_window, Duration::from_secs(60));
        assert_eq!(config.signature_policy, SignaturePolicy::KeyExchangeOnly);
    }

    #[test]
    fn test_env_secs_rejects_garbage() {
        std::env::set_var("MURMUR_TEST_BAD_SECS", "ten");
        assert!(env_secs("MURMUR_TEST_BAD_SECS").is_err());
        std::env::set_var("MURMUR_TEST_GOOD_SECS", " 42 ");
        assert_eq!(env_secs("MURMUR_TEST_GOOD_SECS").unwrap(), Some(42));
        assert_eq!(env_secs("MURMUR_TEST_UNSET_SECS").unwrap(), None);
    }
}
