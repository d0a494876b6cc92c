//! # qc-18-block-subscription
//!
//! Block Subscription server: streams blocks to external subscriber
//! processes over a private TCP protocol.
//!
//! ## Overview
//!
//! This subsystem provides:
//! - **Live feed** (`n`): every newly accepted block, pushed once, in order
//! - **Irreversible catch-up** (`s <height>`): finalized blocks after a
//!   client-chosen height, replayed in bounded chunks on a timer
//! - **Non-blocking sends**: per-connection bounded queues, so a slow client
//!   never stalls block acceptance or other clients
//!
//! ## Architecture
//!
//! ```text
//! Chain engine ──accepted block──→ LiveBroadcaster ──┐
//!      │                                             │
//!      └──irreversible height / block──→ CatchUpScheduler (tick)
//!                                                    │
//!                                                    ▼
//!                     SubscriptionRegistry (single lock, copy-then-send)
//!                                                    │
//!                                                    ▼
//!                       Connection ──frame queue──→ writer task ──→ socket
//!
//! socket ──→ receive loop ──→ CommandDecoder ──→ CommandDispatcher ──→ Registry
//! ```
//!
//! ## Wire Format
//!
//! | direction | layout |
//! |-----------|--------|
//! | server → client | `u32` LE length, then that many bytes of JSON |
//! | client → server (binary) | `n` or `s` + `i32` LE height |
//! | client → server (line) | `n\n` or `s <height>\n` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use qc_18_block_subscription::{
//!     AcceptedBlockFeed, BlockSubscriptionService, InMemoryChain, JsonBlockEncoder,
//!     SubscriptionConfig,
//! };
//!
//! let chain = Arc::new(InMemoryChain::new().with_irreversible_lag(12));
//! let service = Arc::new(BlockSubscriptionService::new(
//!     SubscriptionConfig::from_env()?,
//!     chain.clone(),
//!     Arc::new(JsonBlockEncoder::new()),
//! )?);
//! service.start()?;
//!
//! let feed = AcceptedBlockFeed::new(chain.subscribe_accepted(), chain.clone(), service.clone());
//! tokio::spawn(feed.run(service.shutdown_signal()));
//! ```

#![deny(unsafe_code)]

pub mod adapters;
pub mod broadcaster;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod transport;
pub mod wire;

pub use adapters::{AcceptedBlockFeed, InMemoryChain, JsonBlockEncoder};
pub use broadcaster::{BroadcastReport, LiveBroadcaster};
pub use dispatcher::CommandDispatcher;
pub use domain::{
    Block, ConnectionId, Hash, ProtocolMode, Subscription, SubscriptionConfig, SubscriptionKind,
};
pub use error::{
    ChainError, ConfigError, EncodeError, ProtocolError, SubscriptionError, SubscriptionResult,
    TransportError,
};
pub use ports::{BlockEncoder, BlockSubscriptionApi, ChainReader};
pub use registry::{RegistryStats, SubscribeOutcome, SubscriptionRegistry};
pub use scheduler::{CatchUpReport, CatchUpScheduler};
pub use service::BlockSubscriptionService;
pub use transport::{Connection, ConnectionHandler, TcpServer};
pub use wire::{decode_frame, encode_frame, Command};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
