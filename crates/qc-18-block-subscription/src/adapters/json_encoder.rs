//! JSON block encoder.

use crate::domain::Block;
use crate::error::EncodeError;
use crate::ports::BlockEncoder;
use bytes::Bytes;
use serde::Serialize;

/// Wire shape of one block. `id` and `block_num` are explicit so clients
/// need not derive them.
#[derive(Serialize)]
struct BlockMessage<'a> {
    id: String,
    block_num: u64,
    previous: String,
    timestamp: u64,
    producer: &'a str,
    transactions: &'a [serde_json::Value],
}

impl<'a> From<&'a Block> for BlockMessage<'a> {
    fn from(block: &'a Block) -> Self {
        Self {
            id: block.id_hex(),
            block_num: block.height,
            previous: hex::encode(block.previous),
            timestamp: block.timestamp,
            producer: &block.producer,
            transactions: &block.transactions,
        }
    }
}

/// Encodes blocks as compact UTF-8 JSON objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBlockEncoder;

impl JsonBlockEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl BlockEncoder for JsonBlockEncoder {
    fn encode(&self, block: &Block) -> Result<Bytes, EncodeError> {
        serde_json::to_vec(&BlockMessage::from(block))
            .map(Bytes::from)
            .map_err(|e| EncodeError {
                height: block.height,
                reason: e.to_string(),
            })
    }
}
