//! Turns transport events into registry mutations.

use crate::domain::{initial_cursor, ProtocolMode, SubscriptionKind};
use crate::error::ChainError;
use crate::metrics;
use crate::ports::ChainReader;
use crate::registry::{SubscribeOutcome, SubscriptionRegistry};
use crate::transport::{Connection, ConnectionHandler};
use crate::wire::{Command, RawCommand};
use std::sync::Arc;
use tracing::{debug, warn};

/// [`ConnectionHandler`] that drives the subscription state machine.
pub struct CommandDispatcher {
    registry: Arc<SubscriptionRegistry>,
    chain: Arc<dyn ChainReader>,
    protocol: ProtocolMode,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        chain: Arc<dyn ChainReader>,
        protocol: ProtocolMode,
    ) -> Self {
        Self {
            registry,
            chain,
            protocol,
        }
    }

    /// Apply one interpreted command.
    ///
    /// Fails only when a "from now" subscribe cannot resolve the current
    /// irreversible height; nothing is recorded in that case.
    pub fn apply(
        &self,
        connection: &Arc<Connection>,
        command: Command,
    ) -> Result<SubscribeOutcome, ChainError> {
        let (outcome, kind) = match command {
            Command::SubscribeAccepted => (
                self.registry.subscribe_accepted(connection),
                SubscriptionKind::Accepted,
            ),
            Command::SubscribeIrreversible { from_height } => {
                if self
                    .registry
                    .is_subscribed(connection.id(), SubscriptionKind::Irreversible)
                {
                    return Ok(SubscribeOutcome::AlreadySubscribed);
                }
                let cursor = self.starting_cursor(from_height)?;
                (
                    self.registry.subscribe_irreversible(connection, cursor),
                    SubscriptionKind::Irreversible,
                )
            }
        };

        if outcome == SubscribeOutcome::Subscribed {
            metrics::record_subscribe(&kind.to_string());
        }
        Ok(outcome)
    }

    fn starting_cursor(&self, from_height: i32) -> Result<u64, ChainError> {
        let requested = i64::from(from_height);
        if requested > 0 {
            return Ok(initial_cursor(requested, 0));
        }
        let irreversible = self.chain.irreversible_height()?;
        Ok(initial_cursor(requested, irreversible))
    }
}

impl ConnectionHandler for CommandDispatcher {
    fn on_command(&self, connection: &Arc<Connection>, raw: RawCommand) {
        match Command::parse(&raw, self.protocol) {
            Ok(command) => match self.apply(connection, command) {
                Ok(outcome) => {
                    debug!(connection_id = %connection.id(), ?command, ?outcome, "Command handled");
                }
                Err(e) => {
                    warn!(
                        connection_id = %connection.id(),
                        error = %e,
                        "Cannot resolve current irreversible height, subscribe dropped"
                    );
                }
            },
            Err(e) => {
                // Unknown or malformed commands are ignored, no reply is sent
                debug!(connection_id = %connection.id(), error = %e, "Command ignored");
            }
        }
    }

    fn on_disconnect(&self, connection: &Arc<Connection>) {
        self.registry.remove_connection(connection.id());
    }
}
