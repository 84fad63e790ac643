// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Demo chat server and client behind the `serve` and `dial` subcommands.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::caller::{ON_CONNECTION, ON_DISCONNECTION};
use crate::channel::Channel;
use crate::client::Client;
use crate::config::EngineConfig;
use crate::server::Server;
use crate::transport::WebsocketTransport;

/// Room every demo client joins on connect.
pub const DEMO_ROOM: &str = "test";

/// `/join` handler latency, simulating work.
const JOIN_DELAY: Duration = Duration::from_secs(2);

/// Handlers run one at a time per channel, so five `/join`s queue behind
/// each other.
const JOIN_ACK_TIMEOUT: Duration = Duration::from_secs(15);

const JOIN_REQUESTS: usize = 5;

/// Argument of `/join`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub channel: String,
}

/// Payload of `/message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub channel: String,
    pub text: String,
}

impl ChatMessage {
    fn main(text: &str) -> Self {
        Self { id: 10, channel: "main".to_owned(), text: text.to_owned() }
    }
}

/// Build the demo server: greet on connect, join [`DEMO_ROOM`] and answer
/// `/join` acks.
pub fn demo_server(config: &EngineConfig) -> anyhow::Result<Server> {
    let server = Server::new(WebsocketTransport::new(config), config.clone());

    server.on(ON_CONNECTION, |chan: Channel| async move {
        tracing::info!(channel = %chan.id(), "connected");
        if let Err(e) = chan.emit("/message", &ChatMessage::main("using emit")) {
            tracing::warn!(channel = %chan.id(), err = %e, "greeting failed");
        }
        if let Err(e) = chan.join(DEMO_ROOM) {
            tracing::warn!(channel = %chan.id(), err = %e, "join failed");
            return;
        }
        match chan.broadcast_to(DEMO_ROOM, "/message", &ChatMessage::main("using broadcast")) {
            Ok(reached) => tracing::debug!(room = DEMO_ROOM, reached, "broadcast sent"),
            Err(e) => tracing::warn!(err = %e, "broadcast failed"),
        }
    })?;

    server.on(ON_DISCONNECTION, |chan: Channel| async move {
        tracing::info!(channel = %chan.id(), "disconnected");
    })?;

    server.on("/join", |chan: Channel, room: Room| async move {
        tokio::time::sleep(JOIN_DELAY).await;
        tracing::info!(channel = %chan.id(), room = %room.channel, "client joined");
        format!("joined to {}", room.channel)
    })?;

    Ok(server)
}

/// Run the demo server until `shutdown` fires.
pub async fn serve(
    host: &str,
    port: u16,
    config: EngineConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let server = demo_server(&config)?;
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!("chatsock listening on {}", listener.local_addr()?);

    let app = server.router().into_make_service_with_connect_info::<std::net::SocketAddr>();
    axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;

    server.close_all().await;
    Ok(())
}

/// Dial `url`, fire concurrent `/join` acks and stay connected for `linger`
/// or until `shutdown` fires.
pub async fn dial(
    url: &str,
    linger: Duration,
    config: EngineConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let client = Client::builder(WebsocketTransport::new(&config))
        .config(config)
        .on("/message", |chan: Channel, msg: ChatMessage| async move {
            tracing::info!(channel = %chan.id(), ?msg, "got chat message");
        })?
        .on(ON_CONNECTION, |chan: Channel| async move {
            tracing::info!(channel = %chan.id(), "connected");
        })?
        .on(ON_DISCONNECTION, |chan: Channel| async move {
            tracing::info!(channel = %chan.id(), "disconnected");
        })?
        .dial(url)
        .await?;

    let joins = (0..JOIN_REQUESTS).map(|_| {
        let client = client.clone();
        tokio::spawn(async move {
            let room = Room { channel: "main".to_owned() };
            match client.ack_as::<String, _>("/join", &room, JOIN_ACK_TIMEOUT).await {
                Ok(result) => tracing::info!(result = %result, "ack result to /join"),
                Err(e) => tracing::warn!(err = %e, "/join failed"),
            }
        })
    });
    futures_util::future::join_all(joins).await;

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(linger) => {}
        _ = client.channel().closed() => {
            anyhow::bail!("server closed the connection");
        }
    }

    client.close().await;
    tracing::info!("complete");
    Ok(())
}
