use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 128;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;
pub const DEFAULT_REGISTER_TIMEOUT_SECS: u64 = 10;

#[derive(Parser, Debug, Clone)]
#[command(name = "murmur-relay")]
#[command(about = "Murmur relay - routes end-to-end encrypted envelopes between principals")]
pub struct RelayConfig {
    /// HTTP + WebSocket listen address
    #[arg(long, env = "MURMUR_RELAY_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// Frames queued per connection before routing reports the recipient unknown
    #[arg(long, env = "MURMUR_RELAY_OUTBOX", default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Largest accepted WebSocket message
    #[arg(long, env = "MURMUR_RELAY_MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Seconds a new connection has to send its registration
    #[arg(
        long,
        env = "MURMUR_RELAY_REGISTER_TIMEOUT_SECS",
        default_value_t = DEFAULT_REGISTER_TIMEOUT_SECS
    )]
    pub register_timeout_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "MURMUR_RELAY_LOG", default_value = "murmur_relay=info,tower_http=info")]
    pub log_level: String,

    /// Allow binding to a non-loopback address
    #[arg(long, env = "MURMUR_RELAY_ALLOW_PUBLIC_BIND", default_value_t = false)]
    pub allow_public_bind: bool,
}

impl RelayConfig {
    pub fn check_public_bind_allowed(&self) -> anyhow::Result<()> {
        if self.listen.ip().is_loopback() || self.allow_public_bind {
            return Ok(());
        }
        Err(anyhow::anyhow!(
            "refusing non-loopback bind {} without MURMUR_RELAY_ALLOW_PUBLIC_BIND=1",
            self.listen
        ))
    }
}

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub outbox_capacity: usize,
    pub max_frame_bytes: usize,
    pub register_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            register_timeout: Duration::from_secs(DEFAULT_REGISTER_TIMEOUT_SECS),
        }
    }
}

impl From<&RelayConfig> for ConnectionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            outbox_capacity: config.outbox_capacity.max(1),
            max_frame_bytes: config.max_frame_bytes,
            register_timeout: Duration::from_secs(config.register_timeout_secs),
        }
    }
}
