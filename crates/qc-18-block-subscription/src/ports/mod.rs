//! Ports for the Block Subscription subsystem.

pub mod inbound;
pub mod outbound;

pub use inbound::BlockSubscriptionApi;
pub use outbound::{BlockEncoder, ChainReader};
