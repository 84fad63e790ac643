// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router side: accepts upgrades on the endpoint path, turns each connection
//! into a [`Channel`] registered in the hub, and exposes room operations.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::caller::{Handler, Registry};
use crate::channel::{Channel, Side};
use crate::config::EngineConfig;
use crate::error::{ChatError, ChatResult, RegistrationError};
use crate::hub::Hub;
use crate::protocol::{Handshake, Message};
use crate::transport::{Connection, PeerInfo, Transport, Upgrade};

/// Endpoint path served by [`Server::router`].
pub const ENDPOINT_PATH: &str = "/socket.io/";

/// Event server. Cloning is cheap; clones share handlers and channels.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    transport: Arc<dyn Transport>,
    events: Arc<Registry>,
    hub: Arc<Hub>,
    config: EngineConfig,
}

impl Server {
    pub fn new(transport: impl Transport, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                transport: Arc::new(transport),
                events: Arc::new(Registry::new()),
                hub: Arc::new(Hub::new()),
                config,
            }),
        }
    }

    /// Register a handler; see [`Registry::on`].
    pub fn on<M>(&self, event: &str, handler: impl Handler<M>) -> Result<(), RegistrationError> {
        self.inner.events.on(event, handler)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.inner.hub
    }

    /// Axum router serving the endpoint with and without the trailing slash.
    pub fn router(&self) -> Router {
        Router::new()
            .route(ENDPOINT_PATH, any(upgrade_handler))
            .route(ENDPOINT_PATH.trim_end_matches('/'), any(upgrade_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.clone())
    }

    /// Accept one inbound HTTP request. Rejected upgrades answer 503.
    pub async fn handle_upgrade(&self, request: Request) -> Response {
        let Upgrade { mut response, connection, peer } =
            match self.inner.transport.accept_upgrade(request).await {
                Ok(upgrade) => upgrade,
                Err(e) => {
                    tracing::debug!(err = %e, "upgrade rejected");
                    return (StatusCode::SERVICE_UNAVAILABLE, format!("Upgrade failed: {e}"))
                        .into_response();
                }
            };
        self.inner.transport.serve(&mut response);

        let server = self.clone();
        tokio::spawn(async move {
            let Ok(conn) = connection.await else {
                tracing::debug!("upgrade abandoned before handshake");
                return;
            };
            if let Err(e) = server.attach(conn, peer) {
                tracing::warn!(err = %e, "failed to attach connection");
            }
        });
        response
    }

    /// Turn an established connection into an open channel: announce the
    /// handshake, register it and start its pumps.
    pub fn attach(&self, conn: Arc<dyn Connection>, peer: PeerInfo) -> ChatResult<Channel> {
        let inner = &self.inner;
        let (ping_interval, ping_timeout) = conn.ping_params();
        let remote = peer.remote_addr;
        let channel = Channel::new(
            conn,
            Arc::clone(&inner.events),
            Arc::downgrade(&inner.hub),
            peer,
            Side::Server,
            inner.config.buffer_size,
        );

        let handshake = Handshake {
            sid: channel.id().to_owned(),
            upgrades: Vec::new(),
            ping_interval: millis(ping_interval),
            ping_timeout: millis(ping_timeout),
        };
        channel.send_message(&Message::open(&handshake)?)?;

        inner.hub.insert(channel.clone());
        channel.mark_open();
        channel.start();
        tracing::info!(channel = %channel.id(), ?remote, "channel opened");
        Ok(channel)
    }

    // -- Queries -------------------------------------------------------------

    pub fn get(&self, sid: &str) -> Option<Channel> {
        self.inner.hub.get(sid)
    }

    /// Number of live channels.
    pub fn count(&self) -> usize {
        self.inner.hub.count()
    }

    /// Number of channels in `room`.
    pub fn amount(&self, room: &str) -> usize {
        self.inner.hub.amount(room)
    }

    /// Snapshot of the channels in `room`.
    pub fn list(&self, room: &str) -> Vec<Channel> {
        self.inner.hub.members(room)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.inner.hub.all()
    }

    // -- Rooms ---------------------------------------------------------------

    pub fn join(&self, channel: &Channel, room: &str) -> ChatResult<()> {
        if self.inner.hub.join(channel, room) {
            Ok(())
        } else {
            Err(ChatError::Closed)
        }
    }

    pub fn leave(&self, channel: &Channel, room: &str) {
        self.inner.hub.leave(channel.id(), room);
    }

    pub fn leave_all(&self, channel: &Channel) {
        self.inner.hub.leave_all(channel.id());
    }

    /// Emit to every channel currently in `room`. Returns how many were
    /// reached; full or closing channels are skipped.
    pub fn broadcast_to<A: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        args: &A,
    ) -> ChatResult<usize> {
        self.inner.hub.broadcast_to(room, event, args)
    }

    pub fn broadcast_to_all<A: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &A,
    ) -> ChatResult<usize> {
        self.inner.hub.broadcast_to_all(event, args)
    }

    /// Close every live channel and wait for each to finish.
    pub async fn close_all(&self) {
        let channels = self.channels();
        futures_util::future::join_all(channels.iter().map(|c| c.close())).await;
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("events", &self.inner.events)
            .field("hub", &self.inner.hub)
            .finish()
    }
}

async fn upgrade_handler(State(server): State<Server>, request: Request) -> Response {
    server.handle_upgrade(request).await
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
