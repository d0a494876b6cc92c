//! Core domain entities: connection identity, blocks, subscriptions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 32-byte block hash.
pub type Hash = [u8; 32];

/// Opaque identity of one accepted client connection.
///
/// Uses UUID v7 so identities sort by accept time in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh connection identity
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A block as handed over by the chain engine.
///
/// The subscription core only ever looks at `height`. Everything else is
/// carried through to the encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// Block number
    pub height: u64,
    /// Block hash
    pub id: Hash,
    /// Parent block hash
    pub previous: Hash,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Producer account name
    pub producer: String,
    /// Transactions, already in the engine's JSON representation
    pub transactions: Vec<serde_json::Value>,
}

impl Block {
    /// Hex encoded block id
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

/// The two subscription streams a connection can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Live feed of freshly accepted blocks
    Accepted,
    /// Catch-up stream of irreversible blocks
    Irreversible,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Accepted => write!(f, "accepted"),
            SubscriptionKind::Irreversible => write!(f, "irreversible"),
        }
    }
}

/// One subscription held by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Receives every future accepted block exactly once
    Accepted,
    /// `cursor` is the last irreversible height already delivered
    Irreversible { cursor: u64 },
}

impl Subscription {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Subscription::Accepted => SubscriptionKind::Accepted,
            Subscription::Irreversible { .. } => SubscriptionKind::Irreversible,
        }
    }
}

/// The subscriptions of one connection. At most one per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription. Returns `false` (and changes nothing) if one of
    /// the same kind is already present.
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.contains(subscription.kind()) {
            return false;
        }
        self.entries.push(subscription);
        true
    }

    pub fn contains(&self, kind: SubscriptionKind) -> bool {
        self.entries.iter().any(|s| s.kind() == kind)
    }

    /// Current irreversible cursor, if subscribed
    pub fn cursor(&self) -> Option<u64> {
        self.entries.iter().find_map(|s| match s {
            Subscription::Irreversible { cursor } => Some(*cursor),
            Subscription::Accepted => None,
        })
    }

    /// Move the irreversible cursor forward. Never moves it backwards.
    pub fn advance_cursor(&mut self, to: u64) -> bool {
        for entry in &mut self.entries {
            if let Subscription::Irreversible { cursor } = entry {
                if to > *cursor {
                    *cursor = to;
                    return true;
                }
                return false;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_subscription_set_one_per_kind() {
        let mut set = SubscriptionSet::new();
        assert!(set.is_empty());
        assert!(set.insert(Subscription::Accepted));
        assert!(!set.insert(Subscription::Accepted));
        assert!(set.insert(Subscription::Irreversible { cursor: 10 }));
        assert!(!set.insert(Subscription::Irreversible { cursor: 99 }));

        assert_eq!(set.len(), 2);
        assert_eq!(set.cursor(), Some(10));
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let mut set = SubscriptionSet::new();
        set.insert(Subscription::Irreversible { cursor: 10 });

        assert!(set.advance_cursor(15));
        assert!(!set.advance_cursor(12));
        assert_eq!(set.cursor(), Some(15));
    }

    #[test]
    fn test_advance_without_irreversible() {
        let mut set = SubscriptionSet::new();
        set.insert(Subscription::Accepted);
        assert!(!set.advance_cursor(5));
        assert_eq!(set.cursor(), None);
    }

    #[test]
    fn test_block_id_hex() {
        let block = Block {
            height: 1,
            id: [0xab; 32],
            previous: [0; 32],
            timestamp: 0,
            producer: "eosio".into(),
            transactions: vec![],
        };
        assert_eq!(block.id_hex(), "ab".repeat(32));
    }
}
