//! Clients talking through a real relay over WebSocket and HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use murmur_client::{Client, ClientConfig, ClientError, ClientEvent, RelayConnection};
use murmur_common::{Outcome, RejectReason};
use murmur_crypto::KeyPair;
use murmur_relay::{app, AppState, ConnectionSettings};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

type Events = mpsc::UnboundedReceiver<ClientEvent>;

async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(AppState::new(ConnectionSettings::default()));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn connect(
    addr: SocketAddr,
    name: &str,
) -> Result<(Client<RelayConnection>, Events), ClientError> {
    let identity = KeyPair::generate()?;
    let (conn, frames) = RelayConnection::connect(
        &format!("ws://{}/ws", addr),
        &format!("http://{}", addr),
        name,
        &identity.public_key(),
        Duration::from_secs(5),
    )
    .await?;
    let accepted = conn.name().to_string();
    let (client, events) = Client::new(&accepted, identity, ClientConfig::default(), conn)?;
    client.spawn_inbound(frames);
    Ok((client, events))
}

async fn next_event<F>(events: &mut Events, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

async fn wait_for_principal(events: &mut Events, name: &str) {
    next_event(events, |e| {
        matches!(e, ClientEvent::Principals(names) if names.iter().any(|n| n == name))
    })
    .await;
}

async fn next_message(events: &mut Events) -> (String, Vec<u8>) {
    match next_event(events, |e| matches!(e, ClientEvent::Message { .. })).await {
        ClientEvent::Message {
            from, plaintext, ..
        } => (from, plaintext),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_hi_over_relay() {
    let addr = spawn_relay().await;
    let (alice, mut alice_events) = connect(addr, "alice").await.unwrap();
    let (_bob, mut bob_events) = connect(addr, "bob").await.unwrap();
    wait_for_principal(&mut alice_events, "bob").await;

    let id = alice.send("bob", b"hi").await.unwrap();
    assert_eq!(
        next_message(&mut bob_events).await,
        ("alice".to_string(), b"hi".to_vec())
    );

    match next_event(&mut alice_events, |e| {
        matches!(e, ClientEvent::Delivery(status) if status.envelope_id == id)
    })
    .await
    {
        ClientEvent::Delivery(status) => {
            assert_eq!(status.outcome, Outcome::Delivered);
            assert_eq!(status.recipient, "bob");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_mixed_case_names_are_normalized() {
    let addr = spawn_relay().await;
    let (alice, mut alice_events) = connect(addr, "Alice").await.unwrap();
    let (_bob, mut bob_events) = connect(addr, "BOB").await.unwrap();
    assert_eq!(alice.name(), "alice");
    wait_for_principal(&mut alice_events, "bob").await;

    alice.send("Bob", b"case").await.unwrap();
    assert_eq!(next_message(&mut bob_events).await.0, "alice");
}

#[tokio::test]
async fn test_unknown_recipient() {
    let addr = spawn_relay().await;
    let (alice, _alice_events) = connect(addr, "alice").await.unwrap();

    assert!(matches!(
        alice.send("nobody", b"hello?").await,
        Err(ClientError::PeerNotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let addr = spawn_relay().await;
    let _alice = connect(addr, "alice").await.unwrap();

    match connect(addr, "alice").await {
        Err(ClientError::Rejected(reason)) => assert_eq!(reason, RejectReason::DuplicateIdentity),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("duplicate registration accepted"),
    }
}

#[tokio::test]
async fn test_concurrent_exchange_over_relay() {
    let addr = spawn_relay().await;
    let (alice, mut alice_events) = connect(addr, "alice").await.unwrap();
    let (bob, mut bob_events) = connect(addr, "bob").await.unwrap();
    wait_for_principal(&mut alice_events, "bob").await;
    wait_for_principal(&mut bob_events, "alice").await;

    let (a, b) = tokio::join!(alice.send("bob", b"ping"), bob.send("alice", b"pong"));
    a.unwrap();
    b.unwrap();

    assert_eq!(next_message(&mut bob_events).await.1, b"ping");
    assert_eq!(next_message(&mut alice_events).await.1, b"pong");
    assert!(alice
        .session_key("bob")
        .unwrap()
        .ct_eq(&bob.session_key("alice").unwrap()));
}
