// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire message model and text codec.
//!
//! Packets follow the socket.io v2 / engine.io v3 text framing:
//!
//! | kind        | wire text                     |
//! |-------------|-------------------------------|
//! | Open        | `0{handshake json}`           |
//! | Close       | `1`                           |
//! | Ping / Pong | `2` / `3`                     |
//! | Empty       | `40`                          |
//! | Emit        | `42["event",args]`            |
//! | AckRequest  | `42{id}["event",args]`        |
//! | AckResponse | `43{id}[result]`              |
//!
//! Event names and payloads always travel inside a JSON array, so payload
//! bytes can never be mistaken for framing.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::ProtocolError;

/// Packet kind carried by every [`Message`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Handshake carrying connection options.
    Open,
    /// Close the connection and stop every pump.
    Close,
    Ping,
    Pong,
    /// No-op filler.
    #[default]
    Empty,
    /// Fire-and-forget event.
    Emit,
    /// Event that expects a correlated [`MessageType::AckResponse`].
    AckRequest,
    AckResponse,
}

impl MessageType {
    /// True for kinds that drive the connection state machine.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Open | Self::Close | Self::Ping | Self::Pong | Self::Empty)
    }

    fn carries_event(&self) -> bool {
        matches!(self, Self::Emit | Self::AckRequest)
    }

    fn carries_ack_id(&self) -> bool {
        matches!(self, Self::AckRequest | Self::AckResponse)
    }
}

/// One wire-level unit.
///
/// `source` keeps the raw text a message was decoded from and is ignored by
/// equality.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub kind: MessageType,
    /// Correlation id; 0 means no correlation was requested.
    pub ack_id: u64,
    /// Event name; empty for control packets.
    pub method: String,
    /// Opaque JSON payload text, decoded lazily by the matched handler.
    pub args: String,
    pub source: String,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.ack_id == other.ack_id
            && self.method == other.method
            && self.args == other.args
    }
}

impl Eq for Message {}

impl Message {
    pub fn control(kind: MessageType) -> Self {
        Self { kind, ..Self::default() }
    }

    pub fn emit(method: impl Into<String>, args: impl Into<String>) -> Self {
        Self { kind: MessageType::Emit, method: method.into(), args: args.into(), ..Self::default() }
    }

    pub fn ack_request(ack_id: u64, method: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            kind: MessageType::AckRequest,
            ack_id,
            method: method.into(),
            args: args.into(),
            ..Self::default()
        }
    }

    pub fn ack_response(ack_id: u64, args: impl Into<String>) -> Self {
        Self { kind: MessageType::AckResponse, ack_id, args: args.into(), ..Self::default() }
    }

    /// Build the Open packet announcing `handshake` to the peer.
    pub fn open(handshake: &Handshake) -> Result<Self, serde_json::Error> {
        let args = serde_json::to_string(handshake)?;
        Ok(Self { kind: MessageType::Open, args, ..Self::default() })
    }
}

/// Connection options the accepting side announces in its Open packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between pings.
    pub ping_interval: u64,
    /// Milliseconds to wait for a pong.
    pub ping_timeout: u64,
}

// -- Encode ------------------------------------------------------------------

/// Encode a message into its wire text.
pub fn encode(msg: &Message) -> Result<String, ProtocolError> {
    if msg.kind.carries_ack_id() != (msg.ack_id != 0) {
        return Err(ProtocolError::InvalidAckId(msg.ack_id.to_string()));
    }

    if !msg.kind.carries_event() && !msg.method.is_empty() {
        return Err(ProtocolError::MalformedPayload(format!(
            "{:?} packet cannot carry an event name",
            msg.kind
        )));
    }

    let text = match msg.kind {
        MessageType::Open => format!("0{}", msg.args),
        MessageType::Close => format!("1{}", msg.args),
        MessageType::Ping => format!("2{}", msg.args),
        MessageType::Pong => format!("3{}", msg.args),
        MessageType::Empty => {
            if !msg.args.is_empty() {
                return Err(ProtocolError::MalformedPayload(
                    "empty packet cannot carry data".to_owned(),
                ));
            }
            "40".to_owned()
        }
        MessageType::Emit => format!("42{}", event_body(&msg.method, &msg.args)?),
        MessageType::AckRequest => {
            format!("42{}{}", msg.ack_id, event_body(&msg.method, &msg.args)?)
        }
        MessageType::AckResponse => {
            check_args(&msg.args)?;
            format!("43{}[{}]", msg.ack_id, msg.args)
        }
    };
    Ok(text)
}

fn event_body(method: &str, args: &str) -> Result<String, ProtocolError> {
    if method.is_empty() {
        return Err(ProtocolError::MalformedPayload("empty event name".to_owned()));
    }
    check_args(args)?;
    let method = serde_json::to_string(method)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    if args.is_empty() {
        Ok(format!("[{method}]"))
    } else {
        Ok(format!("[{method},{args}]"))
    }
}

/// Args must be empty or exactly one JSON value with no surrounding
/// whitespace, otherwise the text would not survive a decode.
fn check_args(args: &str) -> Result<(), ProtocolError> {
    if args.is_empty() {
        return Ok(());
    }
    let raw: &RawValue = serde_json::from_str(args)
        .map_err(|e| ProtocolError::MalformedPayload(format!("args are not JSON: {e}")))?;
    if raw.get().len() != args.len() {
        return Err(ProtocolError::MalformedPayload(
            "args carry surrounding whitespace".to_owned(),
        ));
    }
    Ok(())
}

// -- Decode ------------------------------------------------------------------

/// Decode wire text into a message.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    let mut chars = text.chars();
    let head = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    let mut msg = match head {
        '0' => control_with_args(MessageType::Open, rest),
        '1' => control_with_args(MessageType::Close, rest),
        '2' => control_with_args(MessageType::Ping, rest),
        '3' => control_with_args(MessageType::Pong, rest),
        '4' => decode_message(rest)?,
        other => return Err(ProtocolError::UnknownType(other.to_string())),
    };
    msg.source = text.to_owned();
    Ok(msg)
}

fn control_with_args(kind: MessageType, rest: &str) -> Message {
    Message { kind, args: rest.to_owned(), ..Message::default() }
}

fn decode_message(rest: &str) -> Result<Message, ProtocolError> {
    let mut chars = rest.chars();
    let sub = chars.next();
    let body = chars.as_str();

    match sub {
        Some('0') if body.is_empty() => Ok(Message::control(MessageType::Empty)),
        Some('0') => {
            Err(ProtocolError::MalformedPayload("trailing data after empty packet".to_owned()))
        }
        Some('2') => {
            let (ack_id, body) = split_ack_id(body)?;
            let (method, args) = parse_event(body)?;
            Ok(match ack_id {
                Some(id) => Message::ack_request(id, method, args),
                None => Message::emit(method, args),
            })
        }
        Some('3') => {
            let (ack_id, body) = split_ack_id(body)?;
            let id = ack_id.ok_or_else(|| ProtocolError::InvalidAckId(String::new()))?;
            Ok(Message::ack_response(id, parse_response(body)?))
        }
        Some(c) => Err(ProtocolError::UnknownType(format!("4{c}"))),
        None => Err(ProtocolError::UnknownType("4".to_owned())),
    }
}

/// Split a leading decimal ack id off `body`. A present id must be non-zero.
fn split_ack_id(body: &str) -> Result<(Option<u64>, &str), ProtocolError> {
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Ok((None, body));
    }
    let (id, tail) = body.split_at(digits);
    match id.parse::<u64>() {
        Ok(0) | Err(_) => Err(ProtocolError::InvalidAckId(id.to_owned())),
        Ok(n) => Ok((Some(n), tail)),
    }
}

fn parse_array(body: &str) -> Result<Vec<&RawValue>, ProtocolError> {
    serde_json::from_str(body).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn parse_event(body: &str) -> Result<(String, String), ProtocolError> {
    let items = parse_array(body)?;
    let (method, args) = match items.as_slice() {
        [method] => (*method, String::new()),
        [method, args] => (*method, args.get().to_owned()),
        _ => {
            return Err(ProtocolError::MalformedPayload(format!(
                "expected [event] or [event,args], got {} items",
                items.len()
            )))
        }
    };
    let method: String = serde_json::from_str(method.get())
        .map_err(|_| ProtocolError::MalformedPayload("event name must be a string".to_owned()))?;
    if method.is_empty() {
        return Err(ProtocolError::MalformedPayload("empty event name".to_owned()));
    }
    Ok((method, args))
}

fn parse_response(body: &str) -> Result<String, ProtocolError> {
    let items = parse_array(body)?;
    match items.as_slice() {
        [] => Ok(String::new()),
        [result] => Ok(result.get().to_owned()),
        _ => Err(ProtocolError::MalformedPayload(format!(
            "expected at most one ack result, got {}",
            items.len()
        ))),
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
