// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: in-memory connections, a transport that dials
//! them into a server, and HTTP server helpers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::protocol::{self, Message};
use crate::server::Server;
use crate::transport::{BoxFuture, Connection, PeerInfo, Transport, Upgrade};

/// One end of an in-memory text pipe. Closing either end closes both.
pub struct MemoryConnection {
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    ping: (Duration, Duration),
}

/// Two connected ends. A zero `ping_interval` disables heartbeats on
/// channels built over them.
pub fn connection_pair(
    ping_interval: Duration,
    ping_timeout: Duration,
) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    let ping = (ping_interval, ping_timeout);
    let a = MemoryConnection { rx: Mutex::new(a_rx), tx: b_tx, closed: closed.clone(), ping };
    let b = MemoryConnection { rx: Mutex::new(b_rx), tx: a_tx, closed, ping };
    (Arc::new(a), Arc::new(b))
}

impl MemoryConnection {
    /// Receive and decode the next message, failing after `timeout`.
    pub async fn next_message(&self, timeout: Duration) -> anyhow::Result<Message> {
        let text = tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| anyhow::anyhow!("no message within {timeout:?}"))??;
        Ok(protocol::decode(&text)?)
    }

    /// Skip heartbeat traffic and return the next non-control message.
    pub async fn next_event(&self, timeout: Duration) -> anyhow::Result<Message> {
        loop {
            let msg = self.next_message(timeout).await?;
            if !msg.kind.is_control() {
                return Ok(msg);
            }
        }
    }

    /// Encode and send `msg` to the other end.
    pub async fn send_message(&self, msg: &Message) -> anyhow::Result<()> {
        self.send(protocol::encode(msg)?).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Connection for MemoryConnection {
    fn receive(&self) -> BoxFuture<'_, Result<String, TransportError>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            // Buffered messages are still delivered after close.
            let text = tokio::select! {
                biased;
                text = rx.recv() => text.ok_or(TransportError::Closed)?,
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
            };
            if text.is_empty() {
                return Err(TransportError::EmptyMessage);
            }
            Ok(text)
        })
    }

    fn send(&self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(TransportError::Closed);
            }
            self.tx.send(text).map_err(|_| TransportError::Closed)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.closed.cancel() })
    }

    fn ping_params(&self) -> (Duration, Duration) {
        self.ping
    }
}

/// A connection whose sends never complete and which never receives, until
/// closed. Fills a channel's outbound queue on demand.
pub struct StalledConnection {
    closed: CancellationToken,
}

impl Default for StalledConnection {
    fn default() -> Self {
        Self { closed: CancellationToken::new() }
    }
}

impl Connection for StalledConnection {
    fn receive(&self) -> BoxFuture<'_, Result<String, TransportError>> {
        Box::pin(async move {
            self.closed.cancelled().await;
            Err(TransportError::Closed)
        })
    }

    fn send(&self, _text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.closed.cancelled().await;
            Err(TransportError::Closed)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.closed.cancel() })
    }

    fn ping_params(&self) -> (Duration, Duration) {
        (Duration::ZERO, Duration::ZERO)
    }
}

/// Transport whose `connect` attaches the far end of a fresh
/// [`connection_pair`] to `server`, skipping HTTP entirely. Heartbeats are
/// off.
pub struct MemoryTransport {
    server: Server,
}

impl MemoryTransport {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

impl Transport for MemoryTransport {
    fn connect<'a>(
        &'a self,
        _url: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Connection>, TransportError>> {
        Box::pin(async move {
            let (client_end, server_end) = connection_pair(Duration::ZERO, Duration::ZERO);
            self.server
                .attach(server_end, PeerInfo::default())
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let conn: Arc<dyn Connection> = client_end;
            Ok(conn)
        })
    }

    fn accept_upgrade(&self, _request: Request) -> BoxFuture<'_, Result<Upgrade, TransportError>> {
        Box::pin(async move {
            Err(TransportError::UpgradeFailed("memory transport accepts no HTTP".to_owned()))
        })
    }
}

/// Serve `server.router()` on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    server: Server,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = server.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await;
    });
    Ok((addr, handle))
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
