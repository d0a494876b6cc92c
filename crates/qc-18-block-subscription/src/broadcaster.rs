//! # Live Broadcaster
//!
//! Pushes each accepted block to every accepted-feed subscriber. The block is
//! encoded and framed once, then the same frame is queued on each target.
//! Queuing never waits on a socket.

use crate::domain::Block;
use crate::error::SubscriptionResult;
use crate::metrics;
use crate::ports::BlockEncoder;
use crate::registry::SubscriptionRegistry;
use crate::wire::encode_frame;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub height: u64,
    /// Subscribers the frame was queued for
    pub delivered: usize,
    /// Subscribers that were gone or too slow
    pub failed: usize,
    /// The block could not be encoded; nothing was sent
    pub encode_failed: bool,
}

/// Encode one block and wrap it in a frame.
pub(crate) fn frame_block(encoder: &dyn BlockEncoder, block: &Block) -> SubscriptionResult<Bytes> {
    let payload = encoder.encode(block)?;
    Ok(encode_frame(&payload)?)
}

pub struct LiveBroadcaster {
    registry: Arc<SubscriptionRegistry>,
    encoder: Arc<dyn BlockEncoder>,
}

impl LiveBroadcaster {
    pub fn new(registry: Arc<SubscriptionRegistry>, encoder: Arc<dyn BlockEncoder>) -> Self {
        Self { registry, encoder }
    }

    pub fn broadcast(&self, block: &Block) -> BroadcastReport {
        let mut report = BroadcastReport {
            height: block.height,
            ..BroadcastReport::default()
        };

        let targets = self.registry.accepted_targets();
        if targets.is_empty() {
            return report;
        }

        let frame = match frame_block(self.encoder.as_ref(), block) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(height = block.height, error = %e, "Accepted block not broadcast");
                metrics::record_encode_failure();
                report.encode_failed = true;
                return report;
            }
        };

        for connection in &targets {
            match connection.send_frame(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(
                        connection_id = %connection.id(),
                        height = block.height,
                        error = %e,
                        "Accepted block not queued"
                    );
                    report.failed += 1;
                }
            }
        }

        metrics::record_frames_sent("accepted", report.delivered as u64);
        metrics::record_send_failures("accepted", report.failed as u64);
        debug!(
            height = block.height,
            delivered = report.delivered,
            failed = report.failed,
            "Accepted block broadcast"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonBlockEncoder;
    use crate::domain::ConnectionId;
    use crate::error::EncodeError;
    use crate::transport::Connection;
    use crate::wire::decode_frame;
    use bytes::BytesMut;
    use tokio::sync::mpsc;

    fn block(height: u64) -> Block {
        Block {
            height,
            id: [height as u8; 32],
            previous: [0; 32],
            timestamp: 0,
            producer: "eosio".into(),
            transactions: vec![],
        }
    }

    fn connection() -> (Arc<Connection>, mpsc::Receiver<Bytes>) {
        Connection::new(ConnectionId::new(), "127.0.0.1:9000".parse().unwrap(), 8)
    }

    fn block_num(frame: Bytes) -> u64 {
        let mut buf = BytesMut::from(&frame[..]);
        let payload = decode_frame(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        value["block_num"].as_u64().unwrap()
    }

    struct RejectingEncoder;

    impl BlockEncoder for RejectingEncoder {
        fn encode(&self, block: &Block) -> Result<Bytes, EncodeError> {
            Err(EncodeError {
                height: block.height,
                reason: "unknown ABI".into(),
            })
        }
    }

    #[test]
    fn test_each_accepted_subscriber_gets_one_frame() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (a, mut a_rx) = connection();
        let (b, mut b_rx) = connection();
        let (irr, mut irr_rx) = connection();
        registry.subscribe_accepted(&a);
        registry.subscribe_accepted(&b);
        registry.subscribe_irreversible(&irr, 800);

        let broadcaster = LiveBroadcaster::new(registry, Arc::new(JsonBlockEncoder::new()));
        let report = broadcaster.broadcast(&block(900));

        assert_eq!(report.delivered, 2);
        assert_eq!(block_num(a_rx.try_recv().unwrap()), 900);
        assert_eq!(block_num(b_rx.try_recv().unwrap()), 900);
        assert!(a_rx.try_recv().is_err());
        // Irreversible-only subscriber is not touched by the live path
        assert!(irr_rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_subscriber_skipped() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (live, mut live_rx) = connection();
        let (gone, mut gone_rx) = connection();
        registry.subscribe_accepted(&live);
        registry.subscribe_accepted(&gone);
        gone.close();

        let broadcaster = LiveBroadcaster::new(registry, Arc::new(JsonBlockEncoder::new()));
        let report = broadcaster.broadcast(&block(1));

        assert_eq!(report.delivered, 1);
        assert!(live_rx.try_recv().is_ok());
        assert!(gone_rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_subscriber_does_not_block_others() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (slow, _slow_rx) = Connection::new(ConnectionId::new(), "127.0.0.1:1".parse().unwrap(), 1);
        let (fast, mut fast_rx) = connection();
        registry.subscribe_accepted(&slow);
        registry.subscribe_accepted(&fast);

        let broadcaster = LiveBroadcaster::new(registry, Arc::new(JsonBlockEncoder::new()));
        broadcaster.broadcast(&block(1));
        let report = broadcaster.broadcast(&block(2));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(!slow.is_enabled());
        assert_eq!(block_num(fast_rx.try_recv().unwrap()), 1);
        assert_eq!(block_num(fast_rx.try_recv().unwrap()), 2);
    }

    #[test]
    fn test_encode_failure_sends_nothing() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (conn, mut rx) = connection();
        registry.subscribe_accepted(&conn);

        let broadcaster = LiveBroadcaster::new(registry, Arc::new(RejectingEncoder));
        let report = broadcaster.broadcast(&block(7));

        assert!(report.encode_failed);
        assert!(rx.try_recv().is_err());
        assert!(conn.is_enabled());
    }

    #[test]
    fn test_no_subscribers_skips_encoding() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = LiveBroadcaster::new(registry, Arc::new(RejectingEncoder));

        let report = broadcaster.broadcast(&block(3));
        assert!(!report.encode_failed);
        assert_eq!(report.delivered, 0);
    }
}
