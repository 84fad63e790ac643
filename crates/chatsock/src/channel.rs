// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One logical connection: lifecycle state machine, bounded outbound queue,
//! read/write pumps and heartbeat.
//!
//! ```text
//! Connecting ──open──▶ Open ──close / peer Close / heartbeat / I/O failure──▶ Closing ──drained──▶ Closed
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::ack::AckProcessor;
use crate::caller::{Registry, ON_CONNECTION, ON_DISCONNECTION};
use crate::error::{ChatError, ChatResult};
use crate::hub::Hub;
use crate::protocol::{self, Handshake, Message, MessageType};
use crate::transport::{Connection, PeerInfo};

/// Lifecycle of a [`Channel`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a channel left the `Open` state. The first cause wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `Channel::close` was called.
    Local,
    /// The peer sent a Close packet.
    Remote,
    HeartbeatTimeout,
    /// The peer sent text that does not decode.
    Malformed(String),
    ReadFailed(String),
    WriteFailed(String),
}

impl CloseReason {
    /// Graceful closes flush the outbound queue first.
    fn drains(&self) -> bool {
        matches!(self, Self::Local | Self::Remote)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::Remote => f.write_str("closed by peer"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Malformed(e) => write!(f, "malformed packet: {e}"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// Which end of the connection this channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// Accepted by a server; announces the handshake.
    Server,
    /// Dialed by a client; waits for the handshake.
    Client,
}

/// Handle to one logical connection. Cloning is cheap.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: String,
    side: Side,
    conn: Arc<dyn Connection>,
    out_tx: mpsc::Sender<String>,
    out_rx: Mutex<Option<mpsc::Receiver<String>>>,
    acks: AckProcessor,
    events: Arc<Registry>,
    hub: Weak<Hub>,
    peer: PeerInfo,
    handshake: OnceLock<Handshake>,
    state: watch::Sender<ChannelState>,
    close_reason: Mutex<Option<CloseReason>>,
    closing: CancellationToken,
    opened: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Tasks that called [`Channel::close`]; the read pump is not aborted if
    /// it is one of them.
    closers: Mutex<Vec<tokio::task::Id>>,
}

impl Channel {
    pub(crate) fn new(
        conn: Arc<dyn Connection>,
        events: Arc<Registry>,
        hub: Weak<Hub>,
        peer: PeerInfo,
        side: Side,
        queue_size: usize,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::channel(queue_size.max(1));
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            inner: Arc::new(ChannelInner {
                id: uuid::Uuid::new_v4().to_string(),
                side,
                conn,
                out_tx,
                out_rx: Mutex::new(Some(out_rx)),
                acks: AckProcessor::new(),
                events,
                hub,
                peer,
                handshake: OnceLock::new(),
                state,
                close_reason: Mutex::new(None),
                closing: CancellationToken::new(),
                opened: AtomicBool::new(false),
                last_pong: Mutex::new(Instant::now()),
                closers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the pumps. Calling this twice is a no-op.
    pub(crate) fn start(&self) {
        let Some(out_rx) = self.inner.out_rx.lock().take() else {
            return;
        };
        tokio::spawn(self.clone().supervise(out_rx));
    }

    // -- Accessors -----------------------------------------------------------

    /// Session id, unique per channel.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().clone()
    }

    /// Handshake announced by the server (client-side channels only).
    pub fn handshake(&self) -> Option<&Handshake> {
        self.inner.handshake.get()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.peer.remote_addr
    }

    /// Headers of the upgrade request (server-side channels only).
    pub fn request_headers(&self) -> &HeaderMap {
        &self.inner.peer.headers
    }

    /// Number of acks awaiting a response.
    pub fn pending_acks(&self) -> usize {
        self.inner.acks.pending()
    }

    pub(crate) fn acks(&self) -> &AckProcessor {
        &self.inner.acks
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    // -- Sending -------------------------------------------------------------

    /// Send a fire-and-forget event.
    ///
    /// `args` serializing to `null` (e.g. `()` or `None`) sends no payload.
    /// Fails with [`ChatError::Overflood`] when the outbound queue is full.
    pub fn emit<A: Serialize + ?Sized>(&self, event: &str, args: &A) -> ChatResult<()> {
        let args = marshal(args)?;
        self.send_message(&Message::emit(event, args))
    }

    /// Send an event and wait up to `timeout` for the peer's JSON result.
    ///
    /// Handlers run on the channel's read pump, so a handler awaiting an ack
    /// on its own channel (`connection` included) always times out. Spawn a
    /// task for the call instead.
    pub async fn ack<A: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &A,
        timeout: Duration,
    ) -> ChatResult<String> {
        let args = marshal(args)?;
        let acks = &self.inner.acks;
        let id = acks.next_id();
        let waiter = acks.register(id)?;

        if let Err(e) = self.send_message(&Message::ack_request(id, event, args)) {
            acks.cancel(id);
            return Err(e);
        }

        let result = waiter.wait(timeout).await;
        if result.is_err() {
            acks.cancel(id);
        }
        result
    }

    /// Like [`Channel::ack`], decoding the result into `R`.
    pub async fn ack_as<R: DeserializeOwned, A: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &A,
        timeout: Duration,
    ) -> ChatResult<R> {
        let raw = self.ack(event, args, timeout).await?;
        let text = if raw.is_empty() { "null" } else { raw.as_str() };
        Ok(serde_json::from_str(text)?)
    }

    /// Encode and enqueue one message.
    pub(crate) fn send_message(&self, msg: &Message) -> ChatResult<()> {
        let text = protocol::encode(msg)?;
        self.enqueue(text)
    }

    /// Enqueue pre-encoded wire text without blocking.
    pub(crate) fn enqueue(&self, text: String) -> ChatResult<()> {
        if matches!(self.state(), ChannelState::Closing | ChannelState::Closed) {
            return Err(ChatError::Closed);
        }
        self.inner.out_tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChatError::Overflood,
            mpsc::error::TrySendError::Closed(_) => ChatError::Closed,
        })
    }

    // -- Rooms ---------------------------------------------------------------

    fn hub(&self) -> ChatResult<Arc<Hub>> {
        self.inner.hub.upgrade().ok_or(ChatError::NoServer)
    }

    /// Join `room`. Joining twice is a no-op.
    pub fn join(&self, room: &str) -> ChatResult<()> {
        if self.hub()?.join(self, room) {
            Ok(())
        } else {
            Err(ChatError::Closed)
        }
    }

    pub fn leave(&self, room: &str) -> ChatResult<()> {
        self.hub()?.leave(self.id(), room);
        Ok(())
    }

    pub fn leave_all(&self) -> ChatResult<()> {
        self.hub()?.leave_all(self.id());
        Ok(())
    }

    /// Rooms this channel currently belongs to, sorted.
    pub fn rooms(&self) -> Vec<String> {
        match self.inner.hub.upgrade() {
            Some(hub) => hub.rooms_of(self.id()),
            None => Vec::new(),
        }
    }

    /// Emit to every channel in `room`, this one included if it is a member.
    /// Returns the number of channels the event was queued for.
    pub fn broadcast_to<A: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        args: &A,
    ) -> ChatResult<usize> {
        self.hub()?.broadcast_to(room, event, args)
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Close the channel, flushing queued messages, and wait until it is
    /// `Closed`.
    ///
    /// A handler may close its own channel; it resumes once the channel is
    /// `Closed`.
    pub async fn close(&self) {
        if let Some(task) = tokio::task::try_id() {
            self.inner.closers.lock().push(task);
        }
        self.begin_close(CloseReason::Local);
        self.closed().await;
    }

    /// Wait until the channel reaches `Closed` without initiating a close.
    pub async fn closed(&self) {
        let mut state = self.subscribe_state();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }

    pub(crate) fn mark_open(&self) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == ChannelState::Connecting {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        });
        if changed {
            self.inner.opened.store(true, Ordering::Release);
        }
        changed
    }

    /// Move to `Closing` and signal the write pump. Idempotent.
    fn begin_close(&self, reason: CloseReason) {
        let changed = self.inner.state.send_if_modified(|state| match state {
            ChannelState::Connecting | ChannelState::Open => {
                *state = ChannelState::Closing;
                true
            }
            ChannelState::Closing | ChannelState::Closed => false,
        });
        if changed {
            tracing::debug!(channel = %self.id(), %reason, "channel closing");
            *self.inner.close_reason.lock() = Some(reason);
        }
        self.inner.closing.cancel();
    }

    /// Close after a fatal failure: skip the drain and drop the connection so
    /// a pump blocked on I/O returns.
    async fn fail(&self, reason: CloseReason) {
        self.begin_close(reason);
        self.inner.conn.close().await;
    }

    // -- Pumps ---------------------------------------------------------------

    async fn supervise(self, out_rx: mpsc::Receiver<String>) {
        let reader = tokio::spawn(self.clone().read_pump());
        let heartbeat = tokio::spawn(self.clone().heartbeat());

        self.write_pump(out_rx).await;

        self.begin_close(CloseReason::Local);
        self.inner.conn.close().await;
        heartbeat.abort();
        if !self.inner.closers.lock().contains(&reader.id()) {
            reader.abort();
        }

        self.finish().await;
    }

    async fn write_pump(&self, mut out_rx: mpsc::Receiver<String>) {
        let conn = &self.inner.conn;
        loop {
            let text = tokio::select! {
                biased;
                _ = self.inner.closing.cancelled() => break,
                next = out_rx.recv() => match next {
                    Some(text) => text,
                    None => return,
                },
            };
            if let Err(e) = conn.send(text).await {
                self.begin_close(CloseReason::WriteFailed(e.to_string()));
                return;
            }
        }

        out_rx.close();
        let drain = self.close_reason().map(|r| r.drains()).unwrap_or(true);
        if !drain {
            return;
        }
        while let Ok(text) = out_rx.try_recv() {
            if conn.send(text).await.is_err() {
                return;
            }
        }
        if let Ok(close) = protocol::encode(&Message::control(MessageType::Close)) {
            let _ = conn.send(close).await;
        }
    }

    async fn read_pump(self) {
        if self.inner.side == Side::Server {
            self.inner.events.fire(&self, ON_CONNECTION).await;
        }

        loop {
            let text = match self.inner.conn.receive().await {
                Ok(text) => text,
                Err(e) => {
                    if !self.inner.closing.is_cancelled() {
                        tracing::debug!(channel = %self.id(), err = %e, "read failed");
                    }
                    self.fail(CloseReason::ReadFailed(e.to_string())).await;
                    return;
                }
            };

            let msg = match protocol::decode(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(channel = %self.id(), err = %e, "dropping connection");
                    self.fail(CloseReason::Malformed(e.to_string())).await;
                    return;
                }
            };

            match msg.kind {
                MessageType::Open => {
                    if let Err(reason) = self.on_open(&msg).await {
                        tracing::warn!(channel = %self.id(), %reason, "bad handshake");
                        self.fail(reason).await;
                        return;
                    }
                }
                MessageType::Close => {
                    self.begin_close(CloseReason::Remote);
                    return;
                }
                MessageType::Ping => {
                    let _ = self.send_message(&Message::control(MessageType::Pong));
                }
                MessageType::Pong => {
                    *self.inner.last_pong.lock() = Instant::now();
                }
                MessageType::Empty => {}
                MessageType::Emit | MessageType::AckRequest => {
                    let event = msg.method.clone();
                    if let Err(e) = self.inner.events.dispatch(&self, msg).await {
                        tracing::warn!(channel = %self.id(), event = %event, err = %e, "dispatch failed");
                    }
                }
                MessageType::AckResponse => {
                    if !self.inner.acks.resolve(msg.ack_id, msg.args) {
                        tracing::debug!(channel = %self.id(), ack_id = msg.ack_id, "unmatched ack response");
                    }
                }
            }
        }
    }

    /// Client side: adopt the server handshake and fire `connection`.
    async fn on_open(&self, msg: &Message) -> Result<(), CloseReason> {
        if self.inner.side == Side::Server {
            tracing::debug!(channel = %self.id(), "ignoring Open packet from client");
            return Ok(());
        }
        let handshake: Handshake = serde_json::from_str(&msg.args)
            .map_err(|e| CloseReason::Malformed(format!("handshake: {e}")))?;
        let _ = self.inner.handshake.set(handshake);
        if self.mark_open() {
            tracing::info!(channel = %self.id(), "channel opened");
            self.inner.events.fire(self, ON_CONNECTION).await;
        }
        Ok(())
    }

    async fn heartbeat(self) {
        let (interval, timeout) = self.inner.conn.ping_params();
        if interval.is_zero() {
            return;
        }
        let Some((first, silence_limit)) =
            heartbeat_schedule(tokio::time::Instant::now(), interval, timeout)
        else {
            tracing::debug!(channel = %self.id(), ?interval, "ping interval out of range, heartbeat off");
            return;
        };
        let mut timer = tokio::time::interval_at(first, interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.inner.closing.cancelled() => return,
                _ = timer.tick() => {}
            }

            let silent_for = self.inner.last_pong.lock().elapsed();
            if silent_for > silence_limit {
                tracing::warn!(channel = %self.id(), ?silent_for, "no pong from peer");
                self.fail(CloseReason::HeartbeatTimeout).await;
                return;
            }
            if let Err(e) = self.send_message(&Message::control(MessageType::Ping)) {
                tracing::debug!(channel = %self.id(), err = %e, "ping not queued");
            }
        }
    }

    /// Release waiters and room memberships, reach `Closed`, then fire
    /// `disconnection`.
    async fn finish(&self) {
        self.inner.acks.close();
        if let Some(hub) = self.inner.hub.upgrade() {
            hub.remove(self.id());
        }
        self.inner.state.send_replace(ChannelState::Closed);

        let reason = self.close_reason().unwrap_or(CloseReason::Local);
        tracing::info!(channel = %self.id(), %reason, "channel closed");
        if self.inner.opened.load(Ordering::Acquire) {
            self.inner.events.fire(self, ON_DISCONNECTION).await;
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("side", &self.inner.side)
            .field("state", &self.state())
            .finish()
    }
}

/// First ping tick and the longest tolerated silence, or `None` when the
/// interval does not fit on the clock.
fn heartbeat_schedule(
    now: tokio::time::Instant,
    interval: Duration,
    timeout: Duration,
) -> Option<(tokio::time::Instant, Duration)> {
    let first = now.checked_add(interval)?;
    Some((first, interval.saturating_add(timeout)))
}

/// JSON-encode outbound args; `null` becomes "no payload".
pub(crate) fn marshal<A: Serialize + ?Sized>(args: &A) -> ChatResult<String> {
    let json = serde_json::to_string(args)?;
    Ok(if json == "null" { String::new() } else { json })
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
