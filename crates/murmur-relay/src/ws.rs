//! WebSocket connection handling.
//!
//! Each connection gets a bounded outbox drained by a writer task. The
//! first frame must be `register`; afterwards only `send` is accepted and
//! the envelope's sender must be the name bound to this connection.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use murmur_common::{normalize_name, ClientFrame, RejectReason, ServerFrame};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::directory::ConnectionHandle;
use crate::AppState;

/// Upgrade to a WebSocket with the configured frame limits.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let max = state.settings.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Next text frame, skipping control frames. `None` on close or error.
async fn next_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) | Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
    None
}

fn send_error(handle: &ConnectionHandle, message: impl Into<String>) {
    let _ = handle.try_send(ServerFrame::Error {
        message: message.into(),
    });
}

async fn handle_socket(stream: WebSocket, state: AppState, addr: SocketAddr) {
    debug!("connection from {}", addr);
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(state.settings.outbox_capacity);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(err) => {
                    warn!("failed to encode frame: {}", err);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
        let _ = disconnect_tx.try_send(());
    });

    let handle = ConnectionHandle::new(tx);

    let first =
        tokio::time::timeout(state.settings.register_timeout, next_text(&mut receiver)).await;
    let registration = match first {
        Ok(Some(text)) => match ClientFrame::decode(&text) {
            Ok(ClientFrame::Register { name, public_key }) => Some((name, public_key)),
            _ => None,
        },
        Ok(None) => {
            debug!("{} closed before registering", addr);
            return;
        }
        Err(_) => None,
    };

    let Some((requested, public_key)) = registration else {
        info!("rejected {}: no registration", addr);
        let _ = handle.try_send(ServerFrame::Rejected {
            reason: RejectReason::Unauthenticated,
        });
        return;
    };

    let name = match state
        .directory
        .register(&requested, &public_key, handle.clone())
        .await
    {
        Ok(name) => name,
        Err(err) => {
            info!("rejected {} from {}: {}", requested, addr, err);
            let _ = handle.try_send(ServerFrame::Rejected {
                reason: err.reason(),
            });
            return;
        }
    };
    info!("{} connected as {}", addr, name);

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        send_error(&handle, "binary frames are not supported");
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let frame = match ClientFrame::decode(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("invalid frame from {}: {}", name, err);
                        send_error(&handle, "invalid frame");
                        break;
                    }
                };

                match frame {
                    ClientFrame::Register { .. } => send_error(&handle, "already registered"),
                    ClientFrame::Send { envelope } => {
                        if normalize_name(&envelope.sender) != name {
                            warn!("{} tried to send as {}", name, envelope.sender);
                            send_error(&handle, "sender does not match registered name");
                            continue;
                        }
                        match state.router.route(envelope).await {
                            Ok(status) => {
                                if !handle.try_send(ServerFrame::Status(status)) {
                                    debug!("dropped delivery status for {}", name);
                                }
                            }
                            Err(err) => {
                                warn!("refused envelope from {}: {}", name, err);
                                send_error(&handle, err.to_string());
                            }
                        }
                    }
                }
            }
        }
    }

    state.directory.remove(&name, handle.id()).await;
    info!("{} disconnected", name);
}
