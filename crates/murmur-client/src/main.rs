use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_client::{Client, ClientConfig, ClientEvent, RelayConnection};
use murmur_common::Outcome;
use murmur_crypto::KeyPair;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "murmur-client")]
#[command(about = "Murmur end-to-end encrypted chat client")]
struct Args {
    /// Relay WebSocket endpoint
    #[arg(long, env = "MURMUR_RELAY_URL", default_value = "ws://127.0.0.1:3000/ws")]
    relay: String,

    /// Relay HTTP base URL for public-key lookups
    #[arg(long, env = "MURMUR_API_URL", default_value = "http://127.0.0.1:3000")]
    api: String,

    /// Name to register under
    #[arg(long)]
    name: String,

    /// Identity key file; generated and saved if it does not exist
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Seconds between sweeps of expired session keys
    #[arg(long, default_value_t = 60)]
    sweep_interval: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send { peer: String, text: String },
    Rekey { peer: String },
}

fn parse_input_line(line: &str) -> Result<Command, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err("empty line".into());
    }

    if trimmed.starts_with('/') {
        let mut parts = trimmed.split_whitespace();
        return match (parts.next(), parts.next(), parts.next()) {
            (Some("/rekey"), Some(peer), None) => Ok(Command::Rekey {
                peer: peer.to_string(),
            }),
            (Some("/rekey"), _, _) => Err("usage: /rekey <peer>".into()),
            (Some(other), _, _) => Err(format!("unknown command {other}")),
            (None, _, _) => Err("empty line".into()),
        };
    }

    let (peer, text) = trimmed
        .split_once(char::is_whitespace)
        .ok_or_else(|| "usage: <peer> <message>".to_string())?;
    Ok(Command::Send {
        peer: peer.to_string(),
        text: text.trim_start().to_string(),
    })
}

fn load_or_create_identity(path: Option<&Path>) -> Result<KeyPair> {
    match path {
        Some(path) if path.exists() => {
            let keypair = KeyPair::load(path)?;
            info!("loaded identity from {}", path.display());
            Ok(keypair)
        }
        Some(path) => {
            let keypair = KeyPair::generate()?;
            keypair.save(path)?;
            info!("generated new identity at {}", path.display());
            Ok(keypair)
        }
        None => {
            warn!("no --identity given, using an ephemeral key pair");
            Ok(KeyPair::generate()?)
        }
    }
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Message {
            from, plaintext, ..
        } => println!("[{}] {}", from, String::from_utf8_lossy(&plaintext)),
        ClientEvent::SessionEstablished { peer } => println!("* secure session with {}", peer),
        ClientEvent::ExchangeFailed { peer, reason } => {
            println!("* key exchange with {} failed: {}", peer, reason)
        }
        ClientEvent::Undecryptable { from, .. } => {
            println!("* a message from {} could not be decrypted", from)
        }
        ClientEvent::Delivery(status) => match status.outcome {
            Outcome::Delivered => debug!(envelope_id = %status.envelope_id, "delivered"),
            Outcome::RecipientUnknown => println!("* {} is not online", status.recipient),
            Outcome::DecryptionFailed => {}
        },
        ClientEvent::Principals(names) => println!("* online: {}", names.join(", ")),
        ClientEvent::RelayError(message) => println!("* relay error: {}", message),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    murmur_common::init_tracing_with_default(&args.log_level);

    let config = ClientConfig::from_env()?;
    let identity = load_or_create_identity(args.identity.as_deref())?;

    let (connection, frames) = RelayConnection::connect(
        &args.relay,
        &args.api,
        &args.name,
        &identity.public_key(),
        REGISTER_TIMEOUT,
    )
    .await
    .context("failed to connect to relay")?;
    let name = connection.name().to_string();

    let (client, mut events) = Client::new(&name, identity, config, connection)?;
    let mut inbound = client.spawn_inbound(frames);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    let sweeper = client.clone();
    let sweep_every = Duration::from_secs(args.sweep_interval.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let evicted = sweeper.sweep();
            if evicted > 0 {
                debug!("evicted {} expired sessions", evicted);
            }
        }
    });

    println!("connected as {}. type `<peer> <message>` or `/rekey <peer>`", name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match parse_input_line(&line) {
                    Ok(command) => command,
                    Err(usage) => {
                        println!("* {}", usage);
                        continue;
                    }
                };
                let client = client.clone();
                tokio::spawn(async move {
                    let result = match command {
                        Command::Send { peer, text } => {
                            client.send(&peer, text.as_bytes()).await.map(|_| ())
                        }
                        Command::Rekey { peer } => client.rekey(&peer).await,
                    };
                    if let Err(err) = result {
                        println!("* {}", err);
                    }
                });
            }
            _ = &mut inbound => {
                warn!("relay connection closed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_line() {
        assert_eq!(
            parse_input_line("bob hello there").unwrap(),
            Command::Send {
                peer: "bob".into(),
                text: "hello there".into()
            }
        );
    }

    #[test]
    fn test_parse_rekey_line() {
        assert_eq!(
            parse_input_line("  /rekey bob ").unwrap(),
            Command::Rekey { peer: "bob".into() }
        );
        assert!(parse_input_line("/rekey").is_err());
        assert!(parse_input_line("/rekey bob carol").is_err());
    }

    #[test]
    fn test_parse_rejects_incomplete_lines() {
        assert!(parse_input_line("").is_err());
        assert!(parse_input_line("bob").is_err());
    }

    #[test]
    fn test_identity_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me.key");

        let first = load_or_create_identity(Some(&path)).unwrap();
        assert!(path.exists());
        let second = load_or_create_identity(Some(&path)).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }
}
