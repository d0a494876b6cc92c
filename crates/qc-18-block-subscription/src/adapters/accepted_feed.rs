//! Bridges the engine's accepted-block channel to the broadcaster.
//!
//! The channel is bounded and drops its oldest entries when the feed falls
//! behind. Heights skipped that way are re-read from the chain so every
//! accepted block is still forwarded once, in order.

use crate::domain::Block;
use crate::error::ChainError;
use crate::ports::{BlockSubscriptionApi, ChainReader};
use crate::transport::wait_until_set;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Drains a `broadcast` stream of accepted blocks into a
/// [`BlockSubscriptionApi`], in order and without gaps.
pub struct AcceptedBlockFeed {
    receiver: broadcast::Receiver<Block>,
    chain: Arc<dyn ChainReader>,
    api: Arc<dyn BlockSubscriptionApi>,
    /// Height of the last block handed to `api`
    last_forwarded: Option<u64>,
}

impl AcceptedBlockFeed {
    /// `receiver` should be subscribed before this is called, so the chain
    /// head read here is the height just before the first block it will see.
    pub fn new(
        receiver: broadcast::Receiver<Block>,
        chain: Arc<dyn ChainReader>,
        api: Arc<dyn BlockSubscriptionApi>,
    ) -> Self {
        let last_forwarded = match chain.head_height() {
            Ok(head) => Some(head),
            Err(e) => {
                warn!(error = %e, "Chain head unavailable, gap recovery starts at first block");
                None
            }
        };
        Self {
            receiver,
            chain,
            api,
            last_forwarded,
        }
    }

    /// Forward blocks until the channel closes or `shutdown` is set.
    /// Returns the number of blocks forwarded.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut forwarded = 0u64;
        loop {
            let block = tokio::select! {
                received = self.receiver.recv() => match received {
                    Ok(block) => block,
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Accepted block channel closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!(lagged = count, "Accepted block feed lagged, refilling from chain");
                        continue;
                    }
                },
                _ = wait_until_set(&mut shutdown) => break,
            };

            forwarded += self.fill_gap_before(block.height);
            self.forward(&block);
            forwarded += 1;
        }
        info!(forwarded, "Accepted block feed stopped");
        forwarded
    }

    /// Forward any heights between the last forwarded block and `height`.
    fn fill_gap_before(&mut self, height: u64) -> u64 {
        let Some(last) = self.last_forwarded else {
            return 0;
        };
        let mut filled = 0u64;
        for missing in last.saturating_add(1)..height {
            match self.chain.block_by_height(missing) {
                Ok(Some(block)) => {
                    self.forward(&block);
                    filled += 1;
                }
                Ok(None) => {
                    warn!(error = %ChainError::BlockUnavailable(missing), "Gap not refilled");
                    break;
                }
                Err(e) => {
                    warn!(height = missing, error = %e, "Gap not refilled");
                    break;
                }
            }
        }
        if filled > 0 {
            debug!(from = last + 1, filled, "Refilled accepted blocks from chain");
        }
        filled
    }

    fn forward(&mut self, block: &Block) {
        self.api.on_accepted_block(block);
        self.last_forwarded = Some(block.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryChain;
    use crate::registry::RegistryStats;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        heights: Mutex<Vec<u64>>,
    }

    impl BlockSubscriptionApi for RecordingApi {
        fn on_accepted_block(&self, block: &Block) {
            self.heights.lock().push(block.height);
        }

        fn stats(&self) -> RegistryStats {
            RegistryStats::default()
        }
    }

    /// Run `feed` until `api` has seen `expected` blocks, then shut it down.
    async fn run_until(feed: AcceptedBlockFeed, api: &RecordingApi, expected: usize) -> u64 {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(feed.run(shutdown_rx));
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while api.heights.lock().len() < expected {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("feed should forward every block");
        shutdown_tx.send(true).unwrap();
        task.await.unwrap()
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let chain = Arc::new(InMemoryChain::new());
        let api = Arc::new(RecordingApi::default());
        let feed = AcceptedBlockFeed::new(chain.subscribe_accepted(), chain.clone(), api.clone());

        chain.extend_to(4);

        assert_eq!(run_until(feed, &api, 4).await, 4);
        assert_eq!(*api.heights.lock(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_stops_when_channel_closes() {
        let chain = Arc::new(InMemoryChain::new());
        let api = Arc::new(RecordingApi::default());
        let (accepted_tx, accepted_rx) = broadcast::channel(8);
        let feed = AcceptedBlockFeed::new(accepted_rx, chain.clone(), api.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        chain.extend_to(1);
        accepted_tx.send(chain.block_by_height(1).unwrap().unwrap()).unwrap();
        drop(accepted_tx);

        assert_eq!(feed.run(shutdown_rx).await, 1);
        assert_eq!(*api.heights.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let chain = Arc::new(InMemoryChain::new());
        let api = Arc::new(RecordingApi::default());
        let feed = AcceptedBlockFeed::new(chain.subscribe_accepted(), chain.clone(), api);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(feed.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded, 0);
    }

    #[tokio::test]
    async fn test_lagged_channel_refilled_without_gaps() {
        let chain = Arc::new(InMemoryChain::new());
        chain.extend_to(10);
        let api = Arc::new(RecordingApi::default());
        let feed = AcceptedBlockFeed::new(chain.subscribe_accepted(), chain.clone(), api.clone());

        // More than the channel holds, before the feed drains anything
        chain.extend_to(10 + 1100);

        assert_eq!(run_until(feed, &api, 1100).await, 1100);
        assert_eq!(*api.heights.lock(), (11..=1110).collect::<Vec<_>>());
    }
}
