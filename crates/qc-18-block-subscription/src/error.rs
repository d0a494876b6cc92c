//! Error types for the Block Subscription subsystem.
//!
//! None of these are fatal to the host process. Transport errors end a single
//! connection, protocol errors drop a single command, encode and chain errors
//! defer a block to the next catch-up tick.

use thiserror::Error;

/// Top-level subsystem error.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed client command
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Block could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Chain engine query failed
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Service lifecycle misuse
    #[error("Service already started")]
    AlreadyStarted,
}

/// Result type for subscription operations
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Transport errors. Always scoped to one connection except `Bind`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Listener could not be set up
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Accept failed
    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The connection already raised its disconnect event
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection's outbound queue is full; the client is too slow
    #[error("Send queue full ({capacity} frames)")]
    SendQueueFull { capacity: usize },

    /// Payload does not fit in a u32 length prefix
    #[error("Frame too large: {size} bytes")]
    FrameTooLarge { size: usize },
}

/// Inbound command errors. The offending unit is dropped, the connection stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command identifier not recognized
    #[error("Unknown command byte: 0x{0:02x}")]
    UnknownCommand(u8),

    /// Argument could not be parsed
    #[error("Malformed argument for command '{command}': {reason}")]
    MalformedArgument { command: char, reason: String },

    /// Line mode: no newline within the configured limit
    #[error("Command line exceeds {max} bytes")]
    LineTooLong { max: usize },
}

/// Block encoding failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Failed to encode block #{height}: {reason}")]
pub struct EncodeError {
    pub height: u64,
    pub reason: String,
}

/// Chain engine query failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The engine does not (yet) have the requested block
    #[error("Block #{0} not available")]
    BlockUnavailable(u64),

    /// Any other engine-side failure
    #[error("Chain query failed: {0}")]
    QueryFailed(String),
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick_interval cannot be 0")]
    ZeroTickInterval,

    #[error("chunk_size cannot be 0")]
    ZeroChunkSize,

    #[error("read_buffer_size cannot be 0")]
    ZeroReadBuffer,

    #[error("send_queue_capacity ({capacity}) must be at least chunk_size ({chunk_size})")]
    SendQueueTooSmall { capacity: usize, chunk_size: u64 },

    #[error("max_line_length must be at least {min}")]
    LineLimitTooSmall { min: usize },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
