// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-dispatch registry binding event names to typed async handlers.
//!
//! Handlers come in a closed set of shapes, picked at registration time by
//! the [`Handler`] impls:
//!
//! - `Fn(Channel) -> impl Future<Output = R>`
//! - `Fn(Channel, T) -> impl Future<Output = R>` with `T: DeserializeOwned + Default`
//!
//! where `R: IntoReply`. Each shape is erased behind [`Caller`], which decodes
//! the JSON payload into `T` before invoking.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::Channel;
use crate::error::{ChatError, ChatResult, RegistrationError};
use crate::protocol::{Message, MessageType};
use crate::transport::BoxFuture;

/// Reserved pseudo-event fired once a channel is open.
pub const ON_CONNECTION: &str = "connection";
/// Reserved pseudo-event fired once a channel is closed.
pub const ON_DISCONNECTION: &str = "disconnection";

fn is_reserved(event: &str) -> bool {
    event == ON_CONNECTION || event == ON_DISCONNECTION
}

// -- Replies -----------------------------------------------------------------

/// Conversion of a handler's return value into an optional ack result.
///
/// `Ok(None)` means the handler does not reply.
pub trait IntoReply: Send + 'static {
    fn into_reply(self) -> ChatResult<Option<String>>;
}

impl IntoReply for () {
    fn into_reply(self) -> ChatResult<Option<String>> {
        Ok(None)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> ChatResult<Option<String>> {
        Ok(Some(serde_json::to_string(&self)?))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> ChatResult<Option<String>> {
        Ok(Some(serde_json::to_string(self)?))
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> ChatResult<Option<String>> {
        Ok(Some(self.to_string()))
    }
}

/// Reply with any serializable value.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize + Send + 'static> IntoReply for Json<T> {
    fn into_reply(self) -> ChatResult<Option<String>> {
        Ok(Some(serde_json::to_string(&self.0)?))
    }
}

impl<R, E> IntoReply for Result<R, E>
where
    R: IntoReply,
    E: fmt::Display + Send + 'static,
{
    fn into_reply(self) -> ChatResult<Option<String>> {
        match self {
            Ok(reply) => reply.into_reply(),
            Err(e) => Err(ChatError::Handler(e.to_string())),
        }
    }
}

// -- Type-erased callers -----------------------------------------------------

/// A bound handler, invoked with the raw JSON args of one message.
pub trait Caller: Send + Sync + 'static {
    fn call(&self, channel: Channel, args: String) -> BoxFuture<'static, ChatResult<Option<String>>>;

    /// Whether the handler declares an argument.
    fn takes_args(&self) -> bool;
}

struct NoArgCaller<F> {
    f: F,
}

impl<F, Fut, R> Caller for NoArgCaller<F>
where
    F: Fn(Channel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, channel: Channel, _args: String) -> BoxFuture<'static, ChatResult<Option<String>>> {
        let fut = (self.f)(channel);
        Box::pin(async move { fut.await.into_reply() })
    }

    fn takes_args(&self) -> bool {
        false
    }
}

struct ArgCaller<F, T> {
    f: F,
    _arg: PhantomData<fn() -> T>,
}

impl<F, T, Fut, R> Caller for ArgCaller<F, T>
where
    F: Fn(Channel, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Default + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, channel: Channel, args: String) -> BoxFuture<'static, ChatResult<Option<String>>> {
        let arg = if args.is_empty() { Ok(T::default()) } else { serde_json::from_str::<T>(&args) };
        match arg {
            Ok(arg) => {
                let fut = (self.f)(channel, arg);
                Box::pin(async move { fut.await.into_reply() })
            }
            Err(e) => Box::pin(std::future::ready(Err(ChatError::Json(e)))),
        }
    }

    fn takes_args(&self) -> bool {
        true
    }
}

/// Marker for handlers taking only the channel.
pub struct NoArg;

/// Marker for handlers taking the channel and one decoded argument.
pub struct WithArg<T>(PhantomData<fn() -> T>);

/// Functions that can be registered as event handlers.
///
/// `M` is a marker selecting the handler shape; callers never name it.
pub trait Handler<M>: Send + Sync + Sized + 'static {
    fn into_caller(self) -> Arc<dyn Caller>;
}

impl<F, Fut, R> Handler<NoArg> for F
where
    F: Fn(Channel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn into_caller(self) -> Arc<dyn Caller> {
        Arc::new(NoArgCaller { f: self })
    }
}

impl<F, T, Fut, R> Handler<WithArg<T>> for F
where
    F: Fn(Channel, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Default + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn into_caller(self) -> Arc<dyn Caller> {
        Arc::new(ArgCaller { f: self, _arg: PhantomData })
    }
}

// -- Registry ----------------------------------------------------------------

/// Event name → handler table, owned by one server or client.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<String, Arc<dyn Caller>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`. Fails without touching the table when
    /// the name is empty or already taken.
    pub fn on<M>(&self, event: &str, handler: impl Handler<M>) -> Result<(), RegistrationError> {
        if event.is_empty() {
            return Err(RegistrationError::EmptyEvent);
        }
        let mut handlers = self.handlers.write();
        if handlers.contains_key(event) {
            return Err(RegistrationError::Duplicate(event.to_owned()));
        }
        handlers.insert(event.to_owned(), handler.into_caller());
        Ok(())
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, event: &str) -> Option<Arc<dyn Caller>> {
        self.handlers.read().get(event).map(Arc::clone)
    }

    /// Route an inbound `Emit` or `AckRequest` to its handler.
    ///
    /// Unknown and reserved event names are dropped. A reply is enqueued as
    /// an `AckResponse` only when the message asked for one.
    ///
    /// The handler is awaited in place, so the channel reads nothing else
    /// until it returns. An ack sent on the same channel from inside a
    /// handler cannot be answered and times out.
    pub async fn dispatch(&self, channel: &Channel, msg: Message) -> ChatResult<()> {
        if is_reserved(&msg.method) {
            tracing::debug!(channel = %channel.id(), event = %msg.method, "peer sent reserved event, dropped");
            return Ok(());
        }
        let Some(caller) = self.find(&msg.method) else {
            tracing::debug!(channel = %channel.id(), event = %msg.method, "no handler, dropped");
            return Ok(());
        };

        let reply = caller.call(channel.clone(), msg.args).await?;
        if msg.kind == MessageType::AckRequest {
            if let Some(result) = reply {
                channel.send_message(&Message::ack_response(msg.ack_id, result))?;
            }
        }
        Ok(())
    }

    /// Invoke a reserved pseudo-event handler, if registered.
    pub(crate) async fn fire(&self, channel: &Channel, event: &str) {
        let Some(caller) = self.find(event) else {
            return;
        };
        if let Err(e) = caller.call(channel.clone(), String::new()).await {
            tracing::warn!(channel = %channel.id(), event, err = %e, "lifecycle handler failed");
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut events: Vec<_> = handlers.keys().collect();
        events.sort();
        f.debug_struct("Registry").field("events", &events).finish()
    }
}

#[cfg(test)]
#[path = "caller_tests.rs"]
mod tests;
