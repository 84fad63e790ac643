// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlation of outstanding acknowledgment requests for one channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ChatError, ChatResult};

type Outcome = ChatResult<String>;

/// Per-channel ack bookkeeping.
///
/// Id allocation is a lone atomic so it never waits on the waiter table.
/// Every registered id reaches exactly one terminal outcome: resolved,
/// canceled, or failed with [`ChatError::Closed`] by [`AckProcessor::close`].
#[derive(Debug, Default)]
pub struct AckProcessor {
    counter: AtomicU64,
    waiters: Mutex<WaiterTable>,
}

#[derive(Debug, Default)]
struct WaiterTable {
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    closed: bool,
}

/// Single-use receiver for one ack response.
#[derive(Debug)]
pub struct AckWaiter {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl AckWaiter {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait up to `timeout` for the response text.
    ///
    /// On timeout the caller still owns cleanup: call
    /// [`AckProcessor::cancel`] with [`AckWaiter::id`].
    pub async fn wait(self, timeout: Duration) -> Outcome {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an outcome: the table was torn down.
            Ok(Err(_)) => Err(ChatError::Closed),
            Err(_) => Err(ChatError::SendTimeout),
        }
    }
}

impl AckProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ack id. Never returns 0.
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Install a waiter for `id`. Must happen before the request is sent.
    pub fn register(&self, id: u64) -> ChatResult<AckWaiter> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.waiters.lock();
        if table.closed {
            return Err(ChatError::Closed);
        }
        table.pending.insert(id, tx);
        Ok(AckWaiter { id, rx })
    }

    /// Deliver `result` to the waiter for `id`.
    ///
    /// Returns false when no waiter exists (late response after a timeout or
    /// cancel); that is not an error.
    pub fn resolve(&self, id: u64, result: String) -> bool {
        let waiter = self.waiters.lock().pending.remove(&id);
        match waiter {
            Some(tx) => tx.send(Ok(result)).is_ok(),
            None => false,
        }
    }

    /// Remove the waiter for `id` without delivering anything.
    pub fn cancel(&self, id: u64) -> bool {
        self.waiters.lock().pending.remove(&id).is_some()
    }

    /// Number of outstanding waiters.
    pub fn pending(&self) -> usize {
        self.waiters.lock().pending.len()
    }

    /// Fail every outstanding waiter and refuse new registrations.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut table = self.waiters.lock();
            table.closed = true;
            table.pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(ChatError::Closed));
        }
    }
}

#[cfg(test)]
#[path = "ack_tests.rs"]
mod tests;
