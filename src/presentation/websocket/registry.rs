//! Connection Registry
//!
//! Process-local map from room id to the connections joined to that room on
//! this instance. Each room is an independent `DashMap` entry, so mutation
//! and iteration of one room are mutually exclusive while other rooms
//! proceed in parallel.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::connection::{ConnectionHandle, QueueError};
use super::messages::ServerFrame;
use crate::infrastructure::metrics;

#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<i64, HashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Returns `false` if it was already joined.
    pub fn join(&self, room_id: i64, connection: &ConnectionHandle) -> bool {
        let mut members = self.rooms.entry(room_id).or_default();
        let added = members.insert(connection.id(), connection.clone()).is_none();
        if added {
            debug!(
                room_id,
                connection_id = %connection.id(),
                user_id = connection.user_id(),
                members = members.len(),
                "Connection joined room"
            );
        }
        added
    }

    /// Remove a connection from a room. No-op if absent.
    pub fn leave(&self, room_id: i64, connection_id: Uuid) -> bool {
        match self.rooms.entry(room_id) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&connection_id).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                }
                if removed {
                    debug!(room_id, connection_id = %connection_id, "Connection left room");
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Queue a frame for every local member of a room.
    ///
    /// Never waits on a connection. A member whose outbound buffer is full is
    /// disconnected as a slow consumer; a closed member is skipped. Returns
    /// the number of members the frame was queued for.
    pub fn broadcast_local(&self, room_id: i64, frame: &ServerFrame) -> usize {
        let Some(members) = self.rooms.get(&room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for connection in members.values() {
            match connection.try_deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(QueueError::Full) => {
                    warn!(
                        room_id,
                        connection_id = %connection.id(),
                        user_id = connection.user_id(),
                        "Outbound buffer full, disconnecting slow client"
                    );
                    connection.disconnect();
                    metrics::SLOW_CONSUMER_EVICTIONS_TOTAL.inc();
                }
                Err(QueueError::Closed) => {
                    debug!(
                        room_id,
                        connection_id = %connection.id(),
                        "Skipping closed connection"
                    );
                }
            }
        }
        delivered
    }

    pub fn member_count(&self, room_id: i64) -> usize {
        self.rooms.get(&room_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_member(&self, room_id: i64, connection_id: Uuid) -> bool {
        self.rooms
            .get(&room_id)
            .map(|m| m.contains_key(&connection_id))
            .unwrap_or(false)
    }

    /// Rooms with at least one local member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Distinct local connections across all rooms.
    pub fn connection_count(&self) -> usize {
        let mut ids = std::collections::HashSet::new();
        for room in self.rooms.iter() {
            ids.extend(room.value().keys().copied());
        }
        ids.len()
    }
}
