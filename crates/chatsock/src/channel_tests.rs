// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::*;
use crate::error::ErrorKind;
use crate::test_support::{connection_pair, wait_until, MemoryConnection, StalledConnection};
use crate::transport::{Connection, PeerInfo};

const WAIT: Duration = Duration::from_secs(2);

fn channel_over(conn: Arc<dyn Connection>, events: Arc<Registry>, side: Side, queue: usize) -> Channel {
    Channel::new(conn, events, Weak::new(), PeerInfo::default(), side, queue)
}

/// An open, running channel and the peer end of its connection.
fn open_pair(events: Arc<Registry>) -> (Channel, Arc<MemoryConnection>) {
    let (local, peer) = connection_pair(Duration::ZERO, Duration::ZERO);
    let channel = channel_over(local, events, Side::Client, 64);
    channel.mark_open();
    channel.start();
    (channel, peer)
}

fn counting(events: &Registry, event: &str) -> anyhow::Result<Arc<AtomicUsize>> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    events.on(event, move |_chan: Channel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })?;
    Ok(count)
}

async fn closed_within(channel: &Channel, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, channel.closed()).await.is_ok()
}

#[tokio::test]
async fn emit_reaches_peer() -> anyhow::Result<()> {
    let (channel, peer) = open_pair(Arc::new(Registry::new()));

    channel.emit("/message", &serde_json::json!({"text": "hi"}))?;
    channel.emit("/ping", &())?;

    let msg = peer.next_event(WAIT).await?;
    assert_eq!(msg.kind, MessageType::Emit);
    assert_eq!(msg.method, "/message");
    assert_eq!(msg.args, r#"{"text":"hi"}"#);
    assert_eq!(peer.receive().await?, r#"42["/ping"]"#);
    Ok(())
}

#[tokio::test]
async fn ack_resolves_with_peer_result() -> anyhow::Result<()> {
    let (channel, peer) = open_pair(Arc::new(Registry::new()));

    let responder = tokio::spawn(async move {
        let req = peer.next_event(WAIT).await?;
        anyhow::ensure!(req.kind == MessageType::AckRequest && req.method == "/join");
        peer.send_message(&Message::ack_response(req.ack_id, r#""joined to main""#)).await
    });

    let reply: String = channel.ack_as("/join", &serde_json::json!({"channel": "main"}), WAIT).await?;
    assert_eq!(reply, "joined to main");
    assert_eq!(channel.pending_acks(), 0);
    responder.await??;
    Ok(())
}

#[tokio::test]
async fn concurrent_acks_correlate_out_of_order() -> anyhow::Result<()> {
    const N: u32 = 10;
    let (channel, peer) = open_pair(Arc::new(Registry::new()));

    let responder = tokio::spawn(async move {
        let mut requests = Vec::new();
        while requests.len() < N as usize {
            requests.push(peer.next_event(WAIT).await?);
        }
        for req in requests.into_iter().rev() {
            let n: u32 = serde_json::from_str(&req.args)?;
            peer.send_message(&Message::ack_response(req.ack_id, (n * 10).to_string())).await?;
        }
        anyhow::Ok(())
    });

    let calls = (0..N).map(|n| {
        let channel = channel.clone();
        async move { (n, channel.ack_as::<u32, _>("/times-ten", &n, WAIT).await) }
    });
    for (n, result) in futures_util::future::join_all(calls).await {
        assert_eq!(result?, n * 10);
    }
    responder.await??;
    assert_eq!(channel.pending_acks(), 0);
    Ok(())
}

#[tokio::test]
async fn ack_timeout_removes_waiter() -> anyhow::Result<()> {
    let (channel, peer) = open_pair(Arc::new(Registry::new()));

    let started = Instant::now();
    let result = channel.ack("/silent", &1, Duration::from_millis(50)).await;

    assert!(matches!(result, Err(ChatError::SendTimeout)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "timed out early after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1));
    assert_eq!(channel.pending_acks(), 0);

    // A response arriving after the timeout is ignored.
    let req = peer.next_event(WAIT).await?;
    assert_eq!(req.kind, MessageType::AckRequest);
    peer.send_message(&Message::ack_response(req.ack_id, r#""late""#)).await?;
    peer.send_message(&Message::control(MessageType::Ping)).await?;
    assert_eq!(peer.next_message(WAIT).await?.kind, MessageType::Pong);

    assert_eq!(channel.pending_acks(), 0);
    assert!(channel.is_alive());
    Ok(())
}

#[tokio::test]
async fn full_queue_fails_fast() -> anyhow::Result<()> {
    let conn: Arc<dyn Connection> = Arc::new(StalledConnection::default());
    let channel = channel_over(conn, Arc::new(Registry::new()), Side::Client, 2);

    channel.emit("/a", &1)?;
    channel.emit("/a", &2)?;

    let started = Instant::now();
    let overflow = channel.emit("/a", &3);
    assert!(matches!(overflow, Err(ChatError::Overflood)));

    let ack = channel.ack("/a", &4, WAIT).await;
    assert!(matches!(ack, Err(ref e) if e.kind() == ErrorKind::Overflow));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(channel.pending_acks(), 0);
    Ok(())
}

#[tokio::test]
async fn close_fails_waiters_and_flushes() -> anyhow::Result<()> {
    let events = Arc::new(Registry::new());
    let disconnects = counting(&events, ON_DISCONNECTION)?;
    let (channel, peer) = open_pair(events);

    let waiting = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.ack("/slow", &(), Duration::from_secs(30)).await })
    };
    assert!(wait_until(WAIT, || channel.pending_acks() == 1).await);

    channel.close().await;

    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(channel.close_reason(), Some(CloseReason::Local));
    assert!(matches!(waiting.await?, Err(ChatError::Closed)));
    assert!(matches!(channel.emit("/late", &()), Err(ChatError::Closed)));
    assert!(wait_until(WAIT, || disconnects.load(Ordering::SeqCst) == 1).await);

    assert_eq!(peer.next_message(WAIT).await?.kind, MessageType::AckRequest);
    assert_eq!(peer.next_message(WAIT).await?.kind, MessageType::Close);
    assert!(peer.is_closed());
    Ok(())
}

#[tokio::test]
async fn peer_close_packet_closes_channel() -> anyhow::Result<()> {
    let events = Arc::new(Registry::new());
    let disconnects = counting(&events, ON_DISCONNECTION)?;
    let (channel, peer) = open_pair(events);

    peer.send_message(&Message::control(MessageType::Close)).await?;

    assert!(closed_within(&channel, WAIT).await);
    assert_eq!(channel.close_reason(), Some(CloseReason::Remote));
    assert!(wait_until(WAIT, || disconnects.load(Ordering::SeqCst) == 1).await);
    Ok(())
}

#[tokio::test]
async fn malformed_packet_closes_channel() -> anyhow::Result<()> {
    let (channel, peer) = open_pair(Arc::new(Registry::new()));

    peer.send("9garbage".to_owned()).await?;

    assert!(closed_within(&channel, WAIT).await);
    assert!(matches!(channel.close_reason(), Some(CloseReason::Malformed(_))));
    Ok(())
}

#[tokio::test]
async fn ping_is_answered_with_pong() -> anyhow::Result<()> {
    let (_channel, peer) = open_pair(Arc::new(Registry::new()));

    peer.send_message(&Message::control(MessageType::Ping)).await?;

    assert_eq!(peer.next_message(WAIT).await?.kind, MessageType::Pong);
    Ok(())
}

#[tokio::test]
async fn missing_pongs_close_channel() -> anyhow::Result<()> {
    let (local, peer) = connection_pair(Duration::from_millis(20), Duration::from_millis(20));
    let channel = channel_over(local, Arc::new(Registry::new()), Side::Client, 64);
    channel.mark_open();
    channel.start();

    assert_eq!(peer.next_message(WAIT).await?.kind, MessageType::Ping);
    assert!(closed_within(&channel, WAIT).await);
    assert_eq!(channel.close_reason(), Some(CloseReason::HeartbeatTimeout));
    Ok(())
}

#[tokio::test]
async fn pongs_keep_channel_alive() -> anyhow::Result<()> {
    let (local, peer) = connection_pair(Duration::from_millis(50), Duration::from_millis(100));
    let channel = channel_over(local, Arc::new(Registry::new()), Side::Client, 64);
    channel.mark_open();
    channel.start();

    let answering = tokio::spawn(async move {
        while let Ok(msg) = peer.next_message(WAIT).await {
            if msg.kind == MessageType::Ping {
                let _ = peer.send_message(&Message::control(MessageType::Pong)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(channel.is_alive());
    channel.close().await;
    answering.abort();
    Ok(())
}

#[test]
fn heartbeat_schedule_survives_huge_intervals() {
    let now = tokio::time::Instant::now();

    let (first, limit) = heartbeat_schedule(now, Duration::from_millis(50), Duration::from_millis(100))
        .unwrap_or((now, Duration::ZERO));
    assert_eq!(first, now + Duration::from_millis(50));
    assert_eq!(limit, Duration::from_millis(150));

    assert!(heartbeat_schedule(now, Duration::MAX, Duration::ZERO).is_none());
    let limit = heartbeat_schedule(now, Duration::from_secs(1), Duration::MAX).map(|(_, l)| l);
    assert_eq!(limit, Some(Duration::MAX));
    let limit = heartbeat_schedule(now, Duration::from_millis(u64::MAX), Duration::from_millis(u64::MAX))
        .map(|(_, l)| l);
    assert_eq!(limit, Some(Duration::from_millis(u64::MAX) * 2));
}

#[tokio::test]
async fn huge_ping_interval_leaves_channel_usable() -> anyhow::Result<()> {
    let (local, peer) = connection_pair(Duration::from_millis(u64::MAX), Duration::from_millis(u64::MAX));
    let channel = channel_over(local, Arc::new(Registry::new()), Side::Client, 64);
    channel.mark_open();
    channel.start();

    channel.emit("/a", &1)?;
    assert_eq!(peer.next_event(WAIT).await?.method, "/a");
    assert!(channel.is_alive());
    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn handler_resumes_after_closing_its_own_channel() -> anyhow::Result<()> {
    let events = Arc::new(Registry::new());
    let resumed = Arc::new(AtomicUsize::new(0));
    {
        let resumed = Arc::clone(&resumed);
        events.on("/bye", move |chan: Channel| {
            let resumed = Arc::clone(&resumed);
            async move {
                chan.close().await;
                resumed.fetch_add(1, Ordering::SeqCst);
            }
        })?;
    }
    let disconnects = counting(&events, ON_DISCONNECTION)?;
    let (channel, peer) = open_pair(events);

    peer.send_message(&Message::emit("/bye", "")).await?;

    assert!(closed_within(&channel, WAIT).await);
    assert_eq!(channel.close_reason(), Some(CloseReason::Local));
    assert!(wait_until(WAIT, || resumed.load(Ordering::SeqCst) == 1).await);
    assert!(wait_until(WAIT, || disconnects.load(Ordering::SeqCst) == 1).await);
    Ok(())
}

#[tokio::test]
async fn ack_from_handler_on_same_channel_times_out() -> anyhow::Result<()> {
    let events = Arc::new(Registry::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    events.on("/ask", move |chan: Channel| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(chan.ack("/answer", &(), Duration::from_millis(100)).await);
        }
    })?;
    let (_channel, peer) = open_pair(events);

    peer.send_message(&Message::emit("/ask", "")).await?;
    let req = peer.next_event(WAIT).await?;
    assert_eq!(req.kind, MessageType::AckRequest);
    peer.send_message(&Message::ack_response(req.ack_id, "1")).await?;

    let result = tokio::time::timeout(WAIT, rx.recv()).await?;
    assert!(matches!(result, Some(Err(ChatError::SendTimeout))));
    Ok(())
}

#[tokio::test]
async fn client_adopts_handshake_and_fires_connection() -> anyhow::Result<()> {
    let events = Arc::new(Registry::new());
    let connects = counting(&events, ON_CONNECTION)?;
    let (local, peer) = connection_pair(Duration::ZERO, Duration::ZERO);
    let channel = channel_over(local, events, Side::Client, 64);
    channel.start();
    assert_eq!(channel.state(), ChannelState::Connecting);

    let handshake = Handshake {
        sid: "abc".to_owned(),
        upgrades: Vec::new(),
        ping_interval: 25_000,
        ping_timeout: 60_000,
    };
    peer.send_message(&Message::open(&handshake)?).await?;

    assert!(wait_until(WAIT, || connects.load(Ordering::SeqCst) == 1).await);
    assert!(channel.is_alive());
    assert_eq!(channel.handshake(), Some(&handshake));
    Ok(())
}

#[tokio::test]
async fn disconnection_needs_prior_open() -> anyhow::Result<()> {
    let events = Arc::new(Registry::new());
    let disconnects = counting(&events, ON_DISCONNECTION)?;
    let (local, _peer) = connection_pair(Duration::ZERO, Duration::ZERO);
    let channel = channel_over(local, events, Side::Client, 64);
    channel.start();

    channel.close().await;

    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn rooms_need_a_server() -> anyhow::Result<()> {
    let (channel, _peer) = open_pair(Arc::new(Registry::new()));

    assert!(matches!(channel.join("lobby"), Err(ChatError::NoServer)));
    assert!(matches!(channel.broadcast_to("lobby", "/m", &()), Err(ChatError::NoServer)));
    assert!(channel.rooms().is_empty());
    Ok(())
}

#[test]
fn null_args_marshal_to_no_payload() -> anyhow::Result<()> {
    assert_eq!(marshal(&())?, "");
    assert_eq!(marshal(&None::<u32>)?, "");
    assert_eq!(marshal(&Some(3))?, "3");
    assert_eq!(marshal("x")?, r#""x""#);
    Ok(())
}
