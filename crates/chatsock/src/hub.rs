// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live channel registry and room membership index for one server.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::Serialize;

use crate::channel::{marshal, Channel, ChannelState};
use crate::error::{ChatError, ChatResult};
use crate::protocol::{self, Message};

/// Channels by id and rooms by name. Every mutation takes the single write
/// lock, so `rooms` and `memberships` always agree.
#[derive(Default)]
pub struct Hub {
    inner: RwLock<HubInner>,
}

#[derive(Default)]
struct HubInner {
    channels: HashMap<String, Channel>,
    rooms: HashMap<String, HashMap<String, Channel>>,
    memberships: HashMap<String, BTreeSet<String>>,
}

impl HubInner {
    fn leave(&mut self, id: &str, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        if let Some(joined) = self.memberships.get_mut(id) {
            joined.remove(room);
            if joined.is_empty() {
                self.memberships.remove(id);
            }
        }
    }

    fn leave_all(&mut self, id: &str) {
        let Some(joined) = self.memberships.remove(id) else {
            return;
        };
        for room in joined {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, channel: Channel) {
        self.inner.write().channels.insert(channel.id().to_owned(), channel);
    }

    /// Drop a channel and all of its room memberships.
    pub(crate) fn remove(&self, id: &str) -> Option<Channel> {
        let mut inner = self.inner.write();
        inner.leave_all(id);
        inner.channels.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        self.inner.read().channels.get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.read().channels.len()
    }

    pub fn all(&self) -> Vec<Channel> {
        self.inner.read().channels.values().cloned().collect()
    }

    /// Add `channel` to `room`. Returns false when the channel is not live in
    /// this hub.
    pub fn join(&self, channel: &Channel, room: &str) -> bool {
        if matches!(channel.state(), ChannelState::Closing | ChannelState::Closed) {
            return false;
        }
        let mut inner = self.inner.write();
        if !inner.channels.contains_key(channel.id()) {
            return false;
        }
        inner
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(channel.id().to_owned(), channel.clone());
        inner.memberships.entry(channel.id().to_owned()).or_default().insert(room.to_owned());
        true
    }

    pub fn leave(&self, id: &str, room: &str) {
        self.inner.write().leave(id, room);
    }

    pub fn leave_all(&self, id: &str) {
        self.inner.write().leave_all(id);
    }

    pub fn rooms_of(&self, id: &str) -> Vec<String> {
        self.inner
            .read()
            .memberships
            .get(id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the channels currently in `room`.
    pub fn members(&self, room: &str) -> Vec<Channel> {
        self.inner
            .read()
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn amount(&self, room: &str) -> usize {
        self.inner.read().rooms.get(room).map_or(0, HashMap::len)
    }

    /// Emit to a snapshot of `room`. See [`Hub::broadcast`].
    pub fn broadcast_to<A: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        args: &A,
    ) -> ChatResult<usize> {
        Self::broadcast(&self.members(room), event, args)
    }

    /// Emit to every live channel.
    pub fn broadcast_to_all<A: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &A,
    ) -> ChatResult<usize> {
        Self::broadcast(&self.all(), event, args)
    }

    /// Encode once and enqueue to each target without blocking. A target
    /// that is full or closing is skipped. Returns the number reached.
    pub fn broadcast<A: Serialize + ?Sized>(
        targets: &[Channel],
        event: &str,
        args: &A,
    ) -> ChatResult<usize> {
        let text = protocol::encode(&Message::emit(event, marshal(args)?))?;
        let mut delivered = 0;
        for channel in targets {
            match channel.enqueue(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e @ (ChatError::Overflood | ChatError::Closed)) => {
                    tracing::debug!(channel = %channel.id(), event, err = %e, "broadcast skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(delivered)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Hub")
            .field("channels", &inner.channels.len())
            .field("rooms", &inner.rooms.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
