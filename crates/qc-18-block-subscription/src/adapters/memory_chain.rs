//! In-memory chain engine for tests and the development node.

use crate::domain::{Block, Hash};
use crate::error::ChainError;
use crate::ports::ChainReader;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// Timestamp of height 0
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Capacity of the accepted-block notification channel
const ACCEPTED_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct ChainState {
    /// `blocks[i]` has height `i + 1`
    blocks: Vec<Block>,
    irreversible: u64,
}

impl ChainState {
    fn head(&self) -> u64 {
        self.blocks.len() as u64
    }
}

/// Append-only chain held in memory.
///
/// With an irreversibility lag, every append moves the irreversible height
/// to `head - lag`. Without one it only moves through
/// [`set_irreversible_height`](Self::set_irreversible_height).
pub struct InMemoryChain {
    state: RwLock<ChainState>,
    irreversible_lag: Option<u64>,
    producer: String,
    accepted_tx: broadcast::Sender<Block>,
}

impl Default for InMemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChain {
    pub fn new() -> Self {
        let (accepted_tx, _) = broadcast::channel(ACCEPTED_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(ChainState::default()),
            irreversible_lag: None,
            producer: "eosio".to_string(),
            accepted_tx,
        }
    }

    /// Keep the irreversible height `lag` blocks behind head.
    pub fn with_irreversible_lag(mut self, lag: u64) -> Self {
        self.irreversible_lag = Some(lag);
        self
    }

    /// Producer name stamped on every block this chain produces.
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    /// Receiver for every block appended from now on, in order.
    pub fn subscribe_accepted(&self) -> broadcast::Receiver<Block> {
        self.accepted_tx.subscribe()
    }

    /// Append a block. Its height must be exactly head + 1.
    pub fn append(&self, block: Block) -> Result<(), ChainError> {
        let mut state = self.state.write();
        let expected = state.head() + 1;
        if block.height != expected {
            return Err(ChainError::QueryFailed(format!(
                "expected block #{expected}, got #{}",
                block.height
            )));
        }
        self.push_locked(&mut state, block);
        Ok(())
    }

    /// Build and append the next block.
    pub fn produce_next(&self) -> Block {
        let mut state = self.state.write();
        let height = state.head() + 1;
        let previous = state.blocks.last().map(|b| b.id).unwrap_or([0u8; 32]);
        let block = Block {
            height,
            id: synthetic_id(height),
            previous,
            timestamp: GENESIS_TIMESTAMP + height,
            producer: self.producer.clone(),
            transactions: Vec::new(),
        };
        self.push_locked(&mut state, block.clone());
        block
    }

    /// Produce blocks until head reaches `height`.
    pub fn extend_to(&self, height: u64) {
        while self.state.read().head() < height {
            self.produce_next();
        }
    }

    /// Move the irreversible height forward, clamped to head. Never moves it
    /// backwards.
    pub fn set_irreversible_height(&self, height: u64) {
        let mut state = self.state.write();
        let clamped = height.min(state.head());
        state.irreversible = state.irreversible.max(clamped);
    }

    fn push_locked(&self, state: &mut ChainState, block: Block) {
        trace!(height = block.height, "Block appended");
        state.blocks.push(block.clone());
        if let Some(lag) = self.irreversible_lag {
            let target = state.head().saturating_sub(lag);
            state.irreversible = state.irreversible.max(target);
        }
        // No receivers is fine
        let _ = self.accepted_tx.send(block);
    }
}

impl ChainReader for InMemoryChain {
    fn irreversible_height(&self) -> Result<u64, ChainError> {
        Ok(self.state.read().irreversible)
    }

    fn head_height(&self) -> Result<u64, ChainError> {
        Ok(self.state.read().head())
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, ChainError> {
        let state = self.state.read();
        let block = height
            .checked_sub(1)
            .and_then(|index| state.blocks.get(index as usize))
            .cloned();
        Ok(block)
    }
}

/// Block number in the first four bytes, as block ids on this chain carry
/// it, followed by a height-derived filler.
fn synthetic_id(height: u64) -> Hash {
    let mut id = [0u8; 32];
    id[..4].copy_from_slice(&(height as u32).to_be_bytes());
    for (i, byte) in id[4..].iter_mut().enumerate() {
        *byte = (height.wrapping_mul(31).wrapping_add(i as u64) & 0xff) as u8;
    }
    id
}
