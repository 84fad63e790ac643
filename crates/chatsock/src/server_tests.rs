// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use axum::body::Body;

use super::*;
use crate::caller::{ON_CONNECTION, ON_DISCONNECTION};
use crate::protocol::MessageType;
use crate::test_support::{connection_pair, wait_until};
use crate::transport::WebsocketTransport;

const WAIT: Duration = Duration::from_secs(2);

fn test_server() -> Server {
    Server::new(WebsocketTransport::default(), EngineConfig::default())
}

#[tokio::test]
async fn attach_announces_handshake_and_registers() -> anyhow::Result<()> {
    let server = test_server();
    let (server_end, client_end) =
        connection_pair(Duration::from_millis(25_000), Duration::from_millis(60_000));

    let channel = server.attach(server_end, PeerInfo::default())?;

    let open = client_end.next_message(WAIT).await?;
    assert_eq!(open.kind, MessageType::Open);
    let handshake: Handshake = serde_json::from_str(&open.args)?;
    assert_eq!(handshake.sid, channel.id());
    assert!(handshake.upgrades.is_empty());
    assert_eq!(handshake.ping_interval, 25_000);
    assert_eq!(handshake.ping_timeout, 60_000);

    assert!(channel.is_alive());
    assert_eq!(server.count(), 1);
    assert!(server.get(channel.id()).is_some());
    assert!(server.get("missing").is_none());
    Ok(())
}

#[tokio::test]
async fn connection_handler_can_join_rooms() -> anyhow::Result<()> {
    let server = test_server();
    server.on(ON_CONNECTION, |chan: Channel| async move {
        let _ = chan.join("lobby");
    })?;
    let (server_end, _client_end) = connection_pair(Duration::ZERO, Duration::ZERO);

    let channel = server.attach(server_end, PeerInfo::default())?;

    assert!(wait_until(WAIT, || server.amount("lobby") == 1).await);
    let listed: Vec<String> = server.list("lobby").iter().map(|c| c.id().to_owned()).collect();
    assert_eq!(listed, vec![channel.id().to_owned()]);

    server.leave(&channel, "lobby");
    assert_eq!(server.amount("lobby"), 0);
    server.join(&channel, "a")?;
    server.join(&channel, "b")?;
    server.leave_all(&channel);
    assert!(channel.rooms().is_empty());
    Ok(())
}

#[tokio::test]
async fn peer_close_fires_disconnection_and_unregisters() -> anyhow::Result<()> {
    let server = test_server();
    let gone = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let gone = Arc::clone(&gone);
        server.on(ON_DISCONNECTION, move |_chan: Channel| {
            let gone = Arc::clone(&gone);
            async move { gone.store(true, std::sync::atomic::Ordering::SeqCst) }
        })?;
    }
    let (server_end, client_end) = connection_pair(Duration::ZERO, Duration::ZERO);
    let channel = server.attach(server_end, PeerInfo::default())?;

    client_end.send_message(&Message::control(MessageType::Close)).await?;

    assert!(tokio::time::timeout(WAIT, channel.closed()).await.is_ok());
    assert_eq!(server.count(), 0);
    assert!(wait_until(WAIT, || gone.load(std::sync::atomic::Ordering::SeqCst)).await);
    assert!(matches!(server.join(&channel, "late"), Err(ChatError::Closed)));
    Ok(())
}

#[tokio::test]
async fn close_all_closes_every_channel() -> anyhow::Result<()> {
    let server = test_server();
    let mut peers = Vec::new();
    for _ in 0..3 {
        let (server_end, client_end) = connection_pair(Duration::ZERO, Duration::ZERO);
        server.attach(server_end, PeerInfo::default())?;
        peers.push(client_end);
    }
    assert_eq!(server.count(), 3);

    server.close_all().await;

    assert_eq!(server.count(), 0);
    assert!(peers.iter().all(|p| p.is_closed()));
    Ok(())
}

#[tokio::test]
async fn plain_request_is_rejected_with_503() -> anyhow::Result<()> {
    let server = test_server();

    let request = axum::http::Request::builder().method("GET").uri(ENDPOINT_PATH).body(Body::empty())?;
    let response = server.handle_upgrade(request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let request = axum::http::Request::builder().method("POST").uri(ENDPOINT_PATH).body(Body::empty())?;
    let response = server.handle_upgrade(request).await;
    let body = axum::body::to_bytes(response.into_body(), 1024).await?;
    assert_eq!(&body[..], b"Upgrade failed: method not allowed");
    Ok(())
}
