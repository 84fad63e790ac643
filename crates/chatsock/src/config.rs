// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::{Parser, Subcommand};

/// Engine tuning shared by servers, clients and the WebSocket transport.
#[derive(Debug, Clone, clap::Args)]
pub struct EngineConfig {
    /// Interval between heartbeat pings in milliseconds (0 disables heartbeats).
    #[arg(long, default_value_t = 30_000, env = "CHATSOCK_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// How long to wait for a pong after a ping, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "CHATSOCK_PING_TIMEOUT_MS")]
    pub ping_timeout_ms: u64,

    /// Read deadline for one inbound message, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "CHATSOCK_RECEIVE_TIMEOUT_MS")]
    pub receive_timeout_ms: u64,

    /// Write deadline for one outbound message, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "CHATSOCK_SEND_TIMEOUT_MS")]
    pub send_timeout_ms: u64,

    /// Capacity of each channel's outbound queue, in messages.
    #[arg(long, default_value_t = 500, env = "CHATSOCK_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// WebSocket read/write buffer size in bytes.
    #[arg(long, default_value_t = 32 * 1024, env = "CHATSOCK_FRAME_BUFFER_SIZE")]
    pub frame_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            ping_timeout_ms: 60_000,
            receive_timeout_ms: 60_000,
            send_timeout_ms: 60_000,
            buffer_size: 500,
            frame_buffer_size: 32 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Event-messaging server and client over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "chatsock", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the demo chat server.
    Serve {
        /// Host to bind on.
        #[arg(long, default_value = "127.0.0.1", env = "CHATSOCK_HOST")]
        host: String,

        /// Port to listen on.
        #[arg(long, default_value_t = 3811, env = "CHATSOCK_PORT")]
        port: u16,
    },
    /// Dial a server and run the demo chat client.
    Dial {
        /// Endpoint URL, e.g. `ws://localhost:3811/socket.io/?EIO=3&transport=websocket`.
        #[arg(long, env = "CHATSOCK_URL")]
        url: String,

        /// Seconds to stay connected before closing.
        #[arg(long, default_value_t = 60)]
        linger_secs: u64,
    },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
