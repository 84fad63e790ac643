// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport capabilities the engine runs on top of.
//!
//! A [`Transport`] produces [`Connection`]s, either by dialing a URL or by
//! accepting an HTTP upgrade. Both traits are object safe so servers and
//! clients hold them as `Arc<dyn ...>`.

pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::Response;
use tokio::sync::oneshot;

use crate::error::TransportError;

pub use ws::{WebsocketConnection, WebsocketTransport};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One live end-point connection, exchanging whole text messages.
///
/// `receive` and `send` may run concurrently from different tasks. `close`
/// must unblock a pending `receive`.
pub trait Connection: Send + Sync + 'static {
    /// Receive the next text message. Binary frames and empty payloads are
    /// errors, never data.
    fn receive(&self) -> BoxFuture<'_, Result<String, TransportError>>;

    /// Send one text message.
    fn send(&self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;

    fn close(&self) -> BoxFuture<'_, ()>;

    /// Heartbeat ping interval and pong timeout.
    fn ping_params(&self) -> (Duration, Duration);
}

/// Request metadata captured while accepting a connection.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub remote_addr: Option<SocketAddr>,
    pub headers: HeaderMap,
}

/// An accepted upgrade: the response to return to the HTTP client and the
/// connection that becomes available once the handshake completes.
pub struct Upgrade {
    pub response: Response,
    pub connection: oneshot::Receiver<Arc<dyn Connection>>,
    pub peer: PeerInfo,
}

/// Connection factory for one transport kind.
pub trait Transport: Send + Sync + 'static {
    /// Dial `url` and return a client connection.
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Connection>, TransportError>>;

    /// Accept a server connection from an inbound HTTP request.
    fn accept_upgrade(&self, request: Request) -> BoxFuture<'_, Result<Upgrade, TransportError>>;

    /// Extra protocol framing on the upgrade response. WebSocket needs none.
    fn serve(&self, _response: &mut Response) {}
}
