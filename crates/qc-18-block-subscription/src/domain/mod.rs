//! # Domain Layer for Block Subscription
//!
//! Pure types and arithmetic with no I/O.
//!
//! - **entities**: `ConnectionId`, `Block`, `Subscription`, `SubscriptionSet`
//! - **catch_up**: cursor initialization and per-tick range selection
//! - **config**: `SubscriptionConfig` and its validation

pub mod catch_up;
pub mod config;
mod entities;

pub use catch_up::{initial_cursor, next_range, ticks_to_catch_up};
pub use config::{ProtocolMode, SubscriptionConfig};
pub use entities::*;
