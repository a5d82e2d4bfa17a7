//! Relay transport.
//!
//! [`Transport`] is the seam between the protocol logic and the network.
//! [`RelayConnection`] is the production implementation: a WebSocket for
//! frames plus HTTP for public-key lookups.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use murmur_common::{ClientFrame, Envelope, PublicKeyResponse, ServerFrame};
use murmur_crypto::PublicKey;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::ClientError;

const OUTBOX_CAPACITY: usize = 128;
const INBOUND_CAPACITY: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand an envelope to the relay. Delivery is reported asynchronously
    /// by a `status` frame.
    async fn send_envelope(&self, envelope: Envelope) -> Result<(), ClientError>;

    /// Current exported public key of `name`, or `None` if not registered.
    async fn lookup(&self, name: &str) -> Result<Option<String>, ClientError>;
}

pub struct RelayConnection {
    name: String,
    outbox: mpsc::Sender<Message>,
    http: reqwest::Client,
    api_base: String,
}

impl RelayConnection {
    /// Connect and register.
    ///
    /// Returns the connection and the stream of frames the relay pushes
    /// after acceptance. Feed those to [`crate::Client::spawn_inbound`].
    pub async fn connect(
        ws_url: &str,
        api_base: &str,
        name: &str,
        public_key: &PublicKey,
        register_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<ServerFrame>), ClientError> {
        let (ws_stream, _) = connect_async(ws_url).await.map_err(ClientError::transport)?;
        let (mut sink, mut stream) = ws_stream.split();

        let register = ClientFrame::Register {
            name: name.to_string(),
            public_key: public_key.export(),
        }
        .encode()?;
        sink.send(Message::Text(register.into()))
            .await
            .map_err(ClientError::transport)?;

        let accepted = tokio::time::timeout(register_timeout, async {
            while let Some(msg) = stream.next().await {
                match msg.map_err(ClientError::transport)? {
                    Message::Text(text) => {
                        return match ServerFrame::decode(text.as_str())? {
                            ServerFrame::Accepted { name } => Ok(name),
                            ServerFrame::Rejected { reason } => Err(ClientError::Rejected(reason)),
                            other => Err(murmur_common::Error::protocol(format!(
                                "expected registration reply, got {other:?}"
                            ))
                            .into()),
                        };
                    }
                    Message::Close(_) => break,
                    _ => continue,
                }
            }
            Err(ClientError::Closed)
        })
        .await
        .map_err(|_| murmur_common::Error::timeout("no registration reply from relay"))??;

        info!("registered with relay as {}", accepted);

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
        tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (frames_tx, frames_rx) = mpsc::channel::<ServerFrame>(INBOUND_CAPACITY);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerFrame::decode(text.as_str()) {
                        Ok(frame) => {
                            if frames_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping undecodable frame from relay: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("relay connection error: {}", e);
                        break;
                    }
                }
            }
            debug!("relay reader finished");
        });

        Ok((
            Self {
                name: accepted,
                outbox: outbox_tx,
                http: reqwest::Client::new(),
                api_base: api_base.trim_end_matches('/').to_string(),
            },
            frames_rx,
        ))
    }

    /// The name the relay accepted, after normalization.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transport for RelayConnection {
    async fn send_envelope(&self, envelope: Envelope) -> Result<(), ClientError> {
        let text = ClientFrame::Send { envelope }.encode()?;
        self.outbox
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ClientError::Closed)
    }

    async fn lookup(&self, name: &str) -> Result<Option<String>, ClientError> {
        let url = format!("{}/public-key/{}", self.api_base, name);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(ClientError::transport)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: PublicKeyResponse = resp
            .error_for_status()
            .map_err(ClientError::transport)?
            .json()
            .await
            .map_err(ClientError::transport)?;
        Ok(Some(body.public_key))
    }
}
