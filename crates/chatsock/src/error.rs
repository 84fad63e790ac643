// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias for channel, server and client operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Malformed wire text. Decoding never yields a partially populated message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed packet: empty message")]
    Empty,

    #[error("malformed packet: unknown packet type {0:?}")]
    UnknownType(String),

    #[error("malformed packet: invalid ack id {0:?}")]
    InvalidAckId(String),

    #[error("malformed packet: {0}")]
    MalformedPayload(String),
}

/// Failures surfaced by a [`Connection`](crate::transport::Connection) or
/// [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("binary messages are not supported")]
    BinaryMessage,

    #[error("wrong packet type error: empty message")]
    EmptyMessage,

    #[error("transport deadline exceeded")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("the HTTP upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Rejected handler registrations. The registry is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("event name must not be empty")]
    EmptyEvent,

    #[error("a handler for {0:?} is already registered")]
    Duplicate(String),
}

/// Top-level error for channel, server and client operations.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("socket overflood")]
    Overflood,

    #[error("ack timeout")]
    SendTimeout,

    #[error("channel is closed")]
    Closed,

    #[error("channel is not attached to a server")]
    NoServer,

    #[error("argument marshal error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handler error: {0}")]
    Handler(String),
}

impl ChatError {
    /// Classify this error for logging and callers that branch on kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Registration(_) => ErrorKind::Dispatch,
            Self::Overflood => ErrorKind::Overflow,
            Self::SendTimeout => ErrorKind::AckTimeout,
            Self::Closed | Self::NoServer => ErrorKind::Closed,
            Self::Json(_) => ErrorKind::Marshal,
            Self::Handler(_) => ErrorKind::Handler,
        }
    }

    /// True when the channel stays usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Overflow
                | ErrorKind::AckTimeout
                | ErrorKind::Dispatch
                | ErrorKind::Marshal
                | ErrorKind::Handler
        )
    }
}

/// Error classes shared by every surface of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Protocol,
    Transport,
    Overflow,
    AckTimeout,
    Dispatch,
    Marshal,
    Handler,
    Closed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protocol => "PROTOCOL",
            Self::Transport => "TRANSPORT",
            Self::Overflow => "OVERFLOW",
            Self::AckTimeout => "ACK_TIMEOUT",
            Self::Dispatch => "DISPATCH",
            Self::Marshal => "MARSHAL",
            Self::Handler => "HANDLER",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
