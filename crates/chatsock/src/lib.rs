// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chatsock: event messaging over WebSocket in the socket.io v2 text format.
//!
//! A [`Server`] accepts connections through its axum router and tracks them
//! as [`Channel`]s grouped into rooms. A [`Client`] dials a server and runs a
//! single channel. Both sides register typed async handlers by event name,
//! emit fire-and-forget events and await acknowledged requests.

pub mod ack;
pub mod caller;
pub mod channel;
pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod test_support;
pub mod transport;

pub use caller::{Json, ON_CONNECTION, ON_DISCONNECTION};
pub use channel::{Channel, ChannelState, CloseReason};
pub use client::{socket_url, Client, ClientBuilder};
pub use config::EngineConfig;
pub use error::{ChatError, ChatResult, ErrorKind};
pub use server::Server;
pub use transport::{Connection, Transport, WebsocketTransport};
