//! # Subscription Registry
//!
//! Maps each connection to its subscriptions. The map sits behind a single
//! exclusive lock shared by the receive loops, the broadcaster and the
//! catch-up scheduler.
//!
//! Critical sections only touch memory. Callers that need to send copy the
//! targets out (`accepted_targets`, `irreversible_cursors`) and send after
//! the lock is released.

use crate::domain::{ConnectionId, Subscription, SubscriptionKind, SubscriptionSet};
use crate::transport::Connection;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscription was recorded
    Subscribed,
    /// The connection already holds one of this kind; nothing changed
    AlreadySubscribed,
    /// The connection is disabled and must not gain entries
    ConnectionClosed,
}

/// Snapshot of registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Connections holding at least one subscription
    pub connections: usize,
    pub accepted: usize,
    pub irreversible: usize,
    /// Lowest irreversible cursor, if any client is catching up
    pub min_cursor: Option<u64>,
}

#[derive(Debug)]
struct ClientRecord {
    connection: Arc<Connection>,
    subscriptions: SubscriptionSet,
}

/// Owner of all per-connection subscription state.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    clients: Mutex<HashMap<ConnectionId, ClientRecord>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to the live accepted-block feed.
    pub fn subscribe_accepted(&self, connection: &Arc<Connection>) -> SubscribeOutcome {
        self.subscribe(connection, Subscription::Accepted)
    }

    /// Subscribe `connection` to the irreversible stream. `cursor` is the last
    /// height the client already has; the first block sent is `cursor + 1`.
    pub fn subscribe_irreversible(
        &self,
        connection: &Arc<Connection>,
        cursor: u64,
    ) -> SubscribeOutcome {
        self.subscribe(connection, Subscription::Irreversible { cursor })
    }

    fn subscribe(&self, connection: &Arc<Connection>, subscription: Subscription) -> SubscribeOutcome {
        let id = connection.id();
        let mut clients = self.clients.lock();

        // Checked under the lock: removal also happens under it, after close()
        if !connection.is_enabled() {
            return SubscribeOutcome::ConnectionClosed;
        }

        let record = clients.entry(id).or_insert_with(|| ClientRecord {
            connection: Arc::clone(connection),
            subscriptions: SubscriptionSet::new(),
        });

        if record.subscriptions.insert(subscription) {
            info!(
                connection_id = %id,
                peer = %connection.peer_addr(),
                kind = %subscription.kind(),
                cursor = ?record.subscriptions.cursor(),
                "Subscribed"
            );
            SubscribeOutcome::Subscribed
        } else {
            debug!(connection_id = %id, kind = %subscription.kind(), "Duplicate subscribe ignored");
            SubscribeOutcome::AlreadySubscribed
        }
    }

    /// Drop every subscription of a connection. Returns the number removed.
    pub fn remove_connection(&self, id: ConnectionId) -> usize {
        let removed = self.clients.lock().remove(&id);
        match removed {
            Some(record) => {
                let count = record.subscriptions.len();
                info!(connection_id = %id, subscriptions = count, "Subscriptions removed");
                count
            }
            None => 0,
        }
    }

    /// Enabled connections holding an accepted subscription.
    pub fn accepted_targets(&self) -> Vec<Arc<Connection>> {
        self.clients
            .lock()
            .values()
            .filter(|r| r.subscriptions.contains(SubscriptionKind::Accepted))
            .filter(|r| r.connection.is_enabled())
            .map(|r| Arc::clone(&r.connection))
            .collect()
    }

    /// Enabled connections holding an irreversible subscription, with their
    /// current cursor.
    pub fn irreversible_cursors(&self) -> Vec<(Arc<Connection>, u64)> {
        self.clients
            .lock()
            .values()
            .filter(|r| r.connection.is_enabled())
            .filter_map(|r| {
                r.subscriptions
                    .cursor()
                    .map(|cursor| (Arc::clone(&r.connection), cursor))
            })
            .collect()
    }

    /// Move a connection's cursor forward. Returns false if the connection is
    /// gone or the cursor is already at or past `to`.
    pub fn advance_cursor(&self, id: ConnectionId, to: u64) -> bool {
        self.clients
            .lock()
            .get_mut(&id)
            .map(|r| r.subscriptions.advance_cursor(to))
            .unwrap_or(false)
    }

    /// Current irreversible cursor of a connection
    pub fn cursor(&self, id: ConnectionId) -> Option<u64> {
        self.clients
            .lock()
            .get(&id)
            .and_then(|r| r.subscriptions.cursor())
    }

    pub fn is_subscribed(&self, id: ConnectionId, kind: SubscriptionKind) -> bool {
        self.clients
            .lock()
            .get(&id)
            .is_some_and(|r| r.subscriptions.contains(kind))
    }

    pub fn stats(&self) -> RegistryStats {
        let clients = self.clients.lock();
        let mut stats = RegistryStats {
            connections: clients.len(),
            ..RegistryStats::default()
        };
        for record in clients.values() {
            if record.subscriptions.contains(SubscriptionKind::Accepted) {
                stats.accepted += 1;
            }
            if let Some(cursor) = record.subscriptions.cursor() {
                stats.irreversible += 1;
                stats.min_cursor = Some(stats.min_cursor.map_or(cursor, |m| m.min(cursor)));
            }
        }
        stats
    }
}
