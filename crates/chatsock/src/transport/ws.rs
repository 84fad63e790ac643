// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: axum upgrades on the server side, tokio-tungstenite
//! on the client side, both adapted to the same text-only [`Connection`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use axum::extract::{ConnectInfo, FromRequestParts, Request, WebSocketUpgrade};
use axum::http::{HeaderMap, Method};
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::{BoxFuture, Connection, PeerInfo, Transport, Upgrade};
use crate::config::EngineConfig;
use crate::error::TransportError;

/// Frame kinds the connection cares about, independent of the WS library.
enum Frame {
    Text(String),
    Binary,
    Close,
    Control,
}

type FrameStream = std::pin::Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;
type FrameSink = std::pin::Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    ping_interval: Duration,
    ping_timeout: Duration,
    receive: Duration,
    send: Duration,
}

/// WebSocket transport configured from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct WebsocketTransport {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub receive_timeout: Duration,
    pub send_timeout: Duration,
    pub buffer_size: usize,
    /// Extra headers sent when dialing.
    pub request_headers: HeaderMap,
}

impl Default for WebsocketTransport {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl WebsocketTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            receive_timeout: config.receive_timeout(),
            send_timeout: config.send_timeout(),
            buffer_size: config.frame_buffer_size,
            request_headers: HeaderMap::new(),
        }
    }

    fn deadlines(&self) -> Deadlines {
        Deadlines {
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            receive: self.receive_timeout,
            send: self.send_timeout,
        }
    }
}

impl Transport for WebsocketTransport {
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Connection>, TransportError>> {
        Box::pin(async move {
            // wss:// needs a process-wide rustls provider.
            let _ = rustls::crypto::ring::default_provider().install_default();
            let mut request =
                url.into_client_request().map_err(|e| TransportError::Io(e.to_string()))?;
            request.headers_mut().extend(self.request_headers.clone());

            let (stream, _) =
                tokio::time::timeout(self.receive_timeout, tokio_tungstenite::connect_async(request))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(|e| TransportError::Io(e.to_string()))?;

            tracing::debug!(url, "websocket dialed");
            let conn: Arc<dyn Connection> =
                Arc::new(WebsocketConnection::from_client(stream, self.deadlines()));
            Ok(conn)
        })
    }

    fn accept_upgrade(&self, request: Request) -> BoxFuture<'_, Result<Upgrade, TransportError>> {
        Box::pin(async move {
            if request.method() != Method::GET {
                return Err(TransportError::MethodNotAllowed);
            }

            let (mut parts, _body) = request.into_parts();
            let peer = PeerInfo {
                remote_addr: parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0),
                headers: parts.headers.clone(),
            };
            let ws = WebSocketUpgrade::from_request_parts(&mut parts, &())
                .await
                .map_err(|rejection| TransportError::UpgradeFailed(rejection.to_string()))?;

            let (tx, rx) = oneshot::channel();
            let deadlines = self.deadlines();
            let response = ws
                .read_buffer_size(self.buffer_size)
                .write_buffer_size(self.buffer_size)
                .on_failed_upgrade(|e| tracing::debug!(err = %e, "websocket upgrade failed"))
                .on_upgrade(move |socket| async move {
                    let conn: Arc<dyn Connection> =
                        Arc::new(WebsocketConnection::from_server(socket, deadlines));
                    let _ = tx.send(conn);
                });

            Ok(Upgrade { response, connection: rx, peer })
        })
    }
}

/// One WebSocket, split so the read and write pumps never contend.
pub struct WebsocketConnection {
    reader: Mutex<FrameStream>,
    writer: Mutex<FrameSink>,
    closed: CancellationToken,
    deadlines: Deadlines,
}

impl WebsocketConnection {
    fn from_server(socket: WebSocket, deadlines: Deadlines) -> Self {
        let (sink, stream) = socket.split();
        let stream = stream.map(|item| match item {
            Ok(AxumMessage::Text(text)) => Ok(Frame::Text(text.as_str().to_owned())),
            Ok(AxumMessage::Binary(_)) => Ok(Frame::Binary),
            Ok(AxumMessage::Close(_)) => Ok(Frame::Close),
            Ok(_) => Ok(Frame::Control),
            Err(e) => Err(TransportError::Io(e.to_string())),
        });
        let sink = sink.sink_map_err(|e| TransportError::Io(e.to_string())).with(|frame: Frame| {
            future::ready(Ok::<_, TransportError>(match frame {
                Frame::Text(text) => AxumMessage::Text(text.into()),
                _ => AxumMessage::Close(None),
            }))
        });
        Self::new(Box::pin(stream), Box::pin(sink), deadlines)
    }

    fn from_client<S>(socket: tokio_tungstenite::WebSocketStream<S>, deadlines: Deadlines) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let stream = stream.map(|item| match item {
            Ok(WsMessage::Text(text)) => Ok(Frame::Text(text.as_str().to_owned())),
            Ok(WsMessage::Binary(_)) => Ok(Frame::Binary),
            Ok(WsMessage::Close(_)) => Ok(Frame::Close),
            Ok(_) => Ok(Frame::Control),
            Err(e) => Err(TransportError::Io(e.to_string())),
        });
        let sink = sink.sink_map_err(|e| TransportError::Io(e.to_string())).with(|frame: Frame| {
            future::ready(Ok::<_, TransportError>(match frame {
                Frame::Text(text) => WsMessage::Text(text.into()),
                _ => WsMessage::Close(None),
            }))
        });
        Self::new(Box::pin(stream), Box::pin(sink), deadlines)
    }

    fn new(reader: FrameStream, writer: FrameSink, deadlines: Deadlines) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            deadlines,
        }
    }
}

impl Connection for WebsocketConnection {
    fn receive(&self) -> BoxFuture<'_, Result<String, TransportError>> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;
            loop {
                let next = tokio::select! {
                    _ = self.closed.cancelled() => return Err(TransportError::Closed),
                    next = tokio::time::timeout(self.deadlines.receive, reader.next()) => next,
                };
                match next {
                    Err(_) => return Err(TransportError::Timeout),
                    Ok(None) | Ok(Some(Ok(Frame::Close))) => return Err(TransportError::Closed),
                    Ok(Some(Err(e))) => return Err(e),
                    Ok(Some(Ok(Frame::Binary))) => return Err(TransportError::BinaryMessage),
                    // WS-level ping/pong are answered by the library.
                    Ok(Some(Ok(Frame::Control))) => continue,
                    Ok(Some(Ok(Frame::Text(text)))) if text.is_empty() => {
                        return Err(TransportError::EmptyMessage)
                    }
                    Ok(Some(Ok(Frame::Text(text)))) => return Ok(text),
                }
            }
        })
    }

    fn send(&self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(TransportError::Closed);
            }
            let mut writer = self.writer.lock().await;
            tokio::select! {
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                sent = tokio::time::timeout(self.deadlines.send, writer.send(Frame::Text(text))) => {
                    sent.unwrap_or(Err(TransportError::Timeout))
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return;
            }
            self.closed.cancel();

            // Best-effort close frame; the peer may already be gone.
            let _ = tokio::time::timeout(self.deadlines.send, async {
                let mut writer = self.writer.lock().await;
                let _ = writer.send(Frame::Close).await;
                let _ = writer.close().await;
            })
            .await;
        })
    }

    fn ping_params(&self) -> (Duration, Duration) {
        (self.deadlines.ping_interval, self.deadlines.ping_timeout)
    }
}
