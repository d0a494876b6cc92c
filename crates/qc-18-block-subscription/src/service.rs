//! Block Subscription service - explicit construction and startup.
//!
//! Owns the registry, the live broadcaster and the catch-up scheduler, and
//! starts the accept loop and the scheduler task on demand. Dependencies are
//! passed in; nothing is discovered globally.

use crate::broadcaster::LiveBroadcaster;
use crate::dispatcher::CommandDispatcher;
use crate::domain::{Block, SubscriptionConfig};
use crate::error::{SubscriptionError, SubscriptionResult};
use crate::ports::{BlockEncoder, BlockSubscriptionApi, ChainReader};
use crate::registry::{RegistryStats, SubscriptionRegistry};
use crate::scheduler::CatchUpScheduler;
use crate::transport::{ConnectionHandler, SessionSettings, TcpServer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

enum Lifecycle {
    Idle,
    Running {
        local_addr: SocketAddr,
        tasks: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// Block subscription server.
pub struct BlockSubscriptionService {
    config: SubscriptionConfig,
    registry: Arc<SubscriptionRegistry>,
    chain: Arc<dyn ChainReader>,
    broadcaster: LiveBroadcaster,
    scheduler: Arc<CatchUpScheduler>,
    shutdown_tx: watch::Sender<bool>,
    lifecycle: Mutex<Lifecycle>,
}

impl BlockSubscriptionService {
    /// Create a service. Nothing is bound until [`start`](Self::start).
    pub fn new(
        config: SubscriptionConfig,
        chain: Arc<dyn ChainReader>,
        encoder: Arc<dyn BlockEncoder>,
    ) -> SubscriptionResult<Self> {
        config.validate()?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = LiveBroadcaster::new(Arc::clone(&registry), Arc::clone(&encoder));
        let scheduler = Arc::new(CatchUpScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&chain),
            encoder,
            config.chunk_size,
            config.tick_interval,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            chain,
            broadcaster,
            scheduler,
            shutdown_tx,
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    /// Bind the listening socket and spawn the accept loop and the scheduler.
    /// Returns the bound address.
    ///
    /// Must be called from within a Tokio runtime. A service starts once.
    pub fn start(&self) -> SubscriptionResult<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(SubscriptionError::AlreadyStarted);
        }

        let server = TcpServer::bind(self.config.listen_addr(), SessionSettings::from(&self.config))?;
        let local_addr = server.local_addr();

        let handler: Arc<dyn ConnectionHandler> = Arc::new(CommandDispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.chain),
            self.config.protocol,
        ));
        let accept_task = tokio::spawn(server.run(handler, self.shutdown_tx.subscribe()));
        let scheduler_task =
            tokio::spawn(Arc::clone(&self.scheduler).run(self.shutdown_tx.subscribe()));

        info!(
            addr = %local_addr,
            chunk_size = self.config.chunk_size,
            tick_interval = ?self.config.tick_interval,
            "Block subscription service started"
        );

        *lifecycle = Lifecycle::Running {
            local_addr,
            tasks: vec![accept_task, scheduler_task],
        };
        Ok(local_addr)
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The scheduler, for running a catch-up pass outside the timer.
    pub fn scheduler(&self) -> &Arc<CatchUpScheduler> {
        &self.scheduler
    }

    /// Receiver that flips to true on shutdown. Lets host tasks (block feeds,
    /// producers) stop together with the service.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop accepting, stop the scheduler and close every session.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Block subscription service shutting down");
        }
    }

    /// Wait for the accept loop and the scheduler to finish after
    /// [`shutdown`](Self::shutdown).
    pub async fn stopped(&self) {
        let tasks = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running { tasks, .. } => tasks,
                Lifecycle::Idle | Lifecycle::Stopped => Vec::new(),
            }
        };

        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Service task ended abnormally");
            }
        }
    }
}

impl BlockSubscriptionApi for BlockSubscriptionService {
    fn on_accepted_block(&self, block: &Block) {
        self.broadcaster.broadcast(block);
    }

    fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

impl Drop for BlockSubscriptionService {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
