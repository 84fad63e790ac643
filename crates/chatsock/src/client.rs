// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side: dials an endpoint and runs one [`Channel`] against it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::caller::{Handler, Registry};
use crate::channel::{Channel, ChannelState, Side};
use crate::config::EngineConfig;
use crate::error::{ChatError, ChatResult, RegistrationError, TransportError};
use crate::hub::Hub;
use crate::transport::{Connection, PeerInfo, Transport};

/// Conventional endpoint URL for a server at `host:port`.
///
/// `secure` selects `wss://`; certificates are checked against the webpki roots.
pub fn socket_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{host}:{port}/socket.io/?EIO=3&transport=websocket")
}

/// Collects handlers before dialing so `connection` fires with them in place.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    events: Arc<Registry>,
    config: EngineConfig,
}

impl ClientBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            events: Arc::new(Registry::new()),
            config: EngineConfig::default(),
        }
    }

    /// Register a handler; see [`Registry::on`].
    pub fn on<M>(self, event: &str, handler: impl Handler<M>) -> Result<Self, RegistrationError> {
        self.events.on(event, handler)?;
        Ok(self)
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Dial `url` and wait for the server's Open handshake.
    pub async fn dial(self, url: &str) -> ChatResult<Client> {
        let conn = self.transport.connect(url).await?;
        tracing::debug!(url, "dialed");
        self.attach(conn).await
    }

    /// Run a client channel over an established connection. Resolves once
    /// the handshake arrives, or fails after the receive timeout.
    pub async fn attach(self, conn: Arc<dyn Connection>) -> ChatResult<Client> {
        let channel = Channel::new(
            Arc::clone(&conn),
            Arc::clone(&self.events),
            std::sync::Weak::<Hub>::new(),
            PeerInfo::default(),
            Side::Client,
            self.config.buffer_size,
        );
        let mut state = channel.subscribe_state();
        channel.start();

        let opened = tokio::time::timeout(
            self.config.receive_timeout(),
            state.wait_for(|s| *s != ChannelState::Connecting),
        )
        .await
        .map(|reached| reached.map(|s| *s));

        match opened {
            Ok(Ok(ChannelState::Open)) => {}
            Ok(_) => return Err(ChatError::Closed),
            Err(_) => {
                channel.close().await;
                return Err(TransportError::Timeout.into());
            }
        }

        Ok(Client { channel, events: self.events })
    }
}

/// A dialed connection plus its handler registry.
#[derive(Clone)]
pub struct Client {
    channel: Channel,
    events: Arc<Registry>,
}

impl Client {
    pub fn builder(transport: impl Transport) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Register a handler after dialing. Messages that arrived earlier were
    /// already dropped.
    pub fn on<M>(&self, event: &str, handler: impl Handler<M>) -> Result<(), RegistrationError> {
        self.events.on(event, handler)
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn id(&self) -> &str {
        self.channel.id()
    }

    pub fn is_alive(&self) -> bool {
        self.channel.is_alive()
    }

    pub fn emit<A: Serialize + ?Sized>(&self, event: &str, args: &A) -> ChatResult<()> {
        self.channel.emit(event, args)
    }

    pub async fn ack<A: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &A,
        timeout: Duration,
    ) -> ChatResult<String> {
        self.channel.ack(event, args, timeout).await
    }

    pub async fn ack_as<R: DeserializeOwned, A: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &A,
        timeout: Duration,
    ) -> ChatResult<R> {
        self.channel.ack_as(event, args, timeout).await
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("channel", &self.channel).finish()
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
