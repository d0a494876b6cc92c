//! Adapters for the Block Subscription ports.
//!
//! - **json_encoder**: `BlockEncoder` producing JSON objects
//! - **accepted_feed**: drives the broadcaster from a `broadcast` channel
//! - **memory_chain**: in-memory `ChainReader` for tests and development

pub mod accepted_feed;
pub mod json_encoder;
pub mod memory_chain;

pub use accepted_feed::AcceptedBlockFeed;
pub use json_encoder::JsonBlockEncoder;
pub use memory_chain::InMemoryChain;
