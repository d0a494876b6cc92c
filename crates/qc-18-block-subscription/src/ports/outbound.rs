//! Driven Ports (SPI - Outbound Dependencies)
//!
//! The chain engine and the block encoder are external collaborators. Both
//! must be callable from the broadcaster (engine callback context) and from
//! the catch-up scheduler task at the same time.

use crate::domain::Block;
use crate::error::{ChainError, EncodeError};
use bytes::Bytes;

/// Read access to the chain engine.
pub trait ChainReader: Send + Sync {
    /// Highest block the engine guarantees will never be reorganized away
    fn irreversible_height(&self) -> Result<u64, ChainError>;

    /// Highest accepted block
    fn head_height(&self) -> Result<u64, ChainError>;

    /// Fetch a block by height. `Ok(None)` if the engine does not have it.
    fn block_by_height(&self, height: u64) -> Result<Option<Block>, ChainError>;
}

/// Turns one block into the payload of one outbound frame.
pub trait BlockEncoder: Send + Sync {
    /// Encode a block. May fail per block (e.g. unresolvable contract ABI).
    fn encode(&self, block: &Block) -> Result<Bytes, EncodeError>;
}
