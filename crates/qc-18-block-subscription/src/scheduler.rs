//! # Catch-up Scheduler
//!
//! On every tick each irreversible subscriber gets the next bounded range of
//! blocks after its cursor, up to the current irreversible height. A client
//! far behind catches up over several ticks, `chunk_size` blocks at a time.
//!
//! ## Failure handling
//!
//! A block that cannot be fetched or encoded stops that client's range for
//! this tick. The cursor only moves past blocks that were actually queued, so
//! the failed height is retried on the next tick. Other clients are not
//! affected.

use crate::broadcaster::frame_block;
use crate::domain::next_range;
use crate::metrics;
use crate::ports::{BlockEncoder, ChainReader};
use crate::registry::SubscriptionRegistry;
use crate::transport::wait_until_set;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpReport {
    /// Irreversible height the tick worked towards
    pub irreversible_height: u64,
    /// Clients that were behind
    pub clients: usize,
    pub blocks_sent: u64,
    pub fetch_failures: u64,
    pub encode_failures: u64,
    pub send_failures: u64,
}

pub struct CatchUpScheduler {
    registry: Arc<SubscriptionRegistry>,
    chain: Arc<dyn ChainReader>,
    encoder: Arc<dyn BlockEncoder>,
    chunk_size: u64,
    tick_interval: Duration,
    /// Ticks must not overlap or two passes could send the same range
    tick_lock: Mutex<()>,
}

impl CatchUpScheduler {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        chain: Arc<dyn ChainReader>,
        encoder: Arc<dyn BlockEncoder>,
        chunk_size: u64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            chain,
            encoder,
            chunk_size: chunk_size.max(1),
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            tick_lock: Mutex::new(()),
        }
    }

    /// Run one catch-up pass over every irreversible subscriber.
    pub fn tick(&self) -> CatchUpReport {
        let _guard = self.tick_lock.lock();
        metrics::record_catch_up_tick();

        let mut report = CatchUpReport::default();
        let head = match self.chain.irreversible_height() {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "Cannot read irreversible height, skipping tick");
                return report;
            }
        };
        report.irreversible_height = head;

        // Each height is fetched and encoded at most once per tick
        let mut frames: HashMap<u64, Option<Bytes>> = HashMap::new();

        for (connection, cursor) in self.registry.irreversible_cursors() {
            let Some(range) = next_range(cursor, head, self.chunk_size) else {
                continue;
            };
            report.clients += 1;

            let mut delivered = cursor;
            for height in range {
                let frame = frames
                    .entry(height)
                    .or_insert_with(|| self.load_frame(height, &mut report))
                    .clone();
                let Some(frame) = frame else { break };

                if let Err(e) = connection.send_frame(frame) {
                    debug!(
                        connection_id = %connection.id(),
                        height,
                        error = %e,
                        "Catch-up stopped for client"
                    );
                    report.send_failures += 1;
                    break;
                }
                delivered = height;
                report.blocks_sent += 1;
            }

            if delivered > cursor {
                self.registry.advance_cursor(connection.id(), delivered);
                trace!(
                    connection_id = %connection.id(),
                    from = cursor + 1,
                    to = delivered,
                    "Irreversible blocks queued"
                );
            }
        }

        metrics::record_frames_sent("irreversible", report.blocks_sent);
        metrics::record_send_failures("irreversible", report.send_failures);
        if let Some(min_cursor) = self.registry.stats().min_cursor {
            metrics::set_irreversible_cursor_min(min_cursor);
        }
        report
    }

    fn load_frame(&self, height: u64, report: &mut CatchUpReport) -> Option<Bytes> {
        let block = match self.chain.block_by_height(height) {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!(height, "Irreversible block not available yet");
                report.fetch_failures += 1;
                return None;
            }
            Err(e) => {
                warn!(height, error = %e, "Failed to fetch irreversible block");
                report.fetch_failures += 1;
                return None;
            }
        };

        match frame_block(self.encoder.as_ref(), &block) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(height, error = %e, "Failed to encode irreversible block, will retry");
                metrics::record_encode_failure();
                report.encode_failures += 1;
                None
            }
        }
    }

    /// Tick every `tick_interval` until `shutdown` is set. The first tick
    /// fires one interval after start.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // `interval` completes its first tick immediately
        interval.tick().await;

        info!(
            interval = ?self.tick_interval,
            chunk_size = self.chunk_size,
            "Catch-up scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick();
                    if report.blocks_sent > 0 || report.fetch_failures > 0 || report.encode_failures > 0 {
                        debug!(
                            head = ?self.chain.head_height().ok(),
                            irreversible_height = report.irreversible_height,
                            clients = report.clients,
                            blocks_sent = report.blocks_sent,
                            fetch_failures = report.fetch_failures,
                            encode_failures = report.encode_failures,
                            send_failures = report.send_failures,
                            "Catch-up tick"
                        );
                    }
                }
                _ = wait_until_set(&mut shutdown) => break,
            }
        }
        info!("Catch-up scheduler stopped");
    }
}
