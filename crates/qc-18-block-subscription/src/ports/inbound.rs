//! Driving Ports (API - Inbound)

use crate::domain::Block;
use crate::registry::RegistryStats;

/// API the chain engine drives.
pub trait BlockSubscriptionApi: Send + Sync {
    /// Called once per newly accepted block, in acceptance order.
    ///
    /// Must return without waiting on any subscriber socket.
    fn on_accepted_block(&self, block: &Block);

    /// Snapshot of current registry counts
    fn stats(&self) -> RegistryStats;
}
