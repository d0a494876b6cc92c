//! Subscription server configuration with validation.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Legacy fixed listening port
pub const DEFAULT_PORT: u16 = 56732;

/// Default catch-up chunk (blocks per client per tick)
pub const DEFAULT_CHUNK_SIZE: u64 = 500;

/// Default socket read size in bytes
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32;

/// Default per-connection outbound queue depth (frames)
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 4096;

/// Default line mode command length limit
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64;

/// Smallest allowed line limit: room for `s -2147483648`
pub const MIN_LINE_LENGTH: usize = 16;

/// How inbound commands are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolMode {
    /// Command byte, followed by a fixed-width little-endian argument
    #[default]
    Binary,
    /// Newline terminated text lines: `n`, `s <height>`
    Line,
}

impl FromStr for ProtocolMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(ProtocolMode::Binary),
            "line" | "text" => Ok(ProtocolMode::Line),
            _ => Err(()),
        }
    }
}

/// Block subscription server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Bind address
    pub host: IpAddr,
    /// Listening port (default: 56732)
    pub port: u16,
    /// Catch-up scheduler period
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Maximum irreversible blocks sent to one client per tick
    pub chunk_size: u64,
    /// Inbound command framing
    pub protocol: ProtocolMode,
    /// Bytes requested per socket read
    pub read_buffer_size: usize,
    /// Outbound frames buffered per connection before it is dropped as too slow
    pub send_queue_capacity: usize,
    /// Line mode only: longest accepted command line
    pub max_line_length: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            tick_interval: Duration::from_millis(1000),
            chunk_size: DEFAULT_CHUNK_SIZE,
            protocol: ProtocolMode::Binary,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl SubscriptionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroReadBuffer);
        }
        // A full chunk must fit in the queue or every catch-up tick would
        // overflow it.
        if (self.send_queue_capacity as u64) < self.chunk_size {
            return Err(ConfigError::SendQueueTooSmall {
                capacity: self.send_queue_capacity,
                chunk_size: self.chunk_size,
            });
        }
        if self.max_line_length < MIN_LINE_LENGTH {
            return Err(ConfigError::LineLimitTooSmall {
                min: MIN_LINE_LENGTH,
            });
        }
        Ok(())
    }

    /// Listening socket address
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Defaults overridden from process environment.
    ///
    /// # Environment Variables
    ///
    /// - `QC_SUBSCRIPTION_HOST`: bind address (default: 0.0.0.0)
    /// - `QC_SUBSCRIPTION_PORT`: listening port (default: 56732)
    /// - `QC_SUBSCRIPTION_TICK_MS`: catch-up interval in ms (default: 1000)
    /// - `QC_SUBSCRIPTION_CHUNK_SIZE`: blocks per client per tick (default: 500)
    /// - `QC_SUBSCRIPTION_PROTOCOL`: `binary` or `line` (default: binary)
    /// - `QC_SUBSCRIPTION_READ_BUFFER`: bytes per read (default: 32)
    /// - `QC_SUBSCRIPTION_SEND_QUEUE`: frames per connection (default: 4096)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = parse_var(&lookup, "QC_SUBSCRIPTION_HOST")? {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "QC_SUBSCRIPTION_PORT")? {
            config.port = port;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "QC_SUBSCRIPTION_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(chunk) = parse_var(&lookup, "QC_SUBSCRIPTION_CHUNK_SIZE")? {
            config.chunk_size = chunk;
        }
        if let Some(protocol) = parse_var(&lookup, "QC_SUBSCRIPTION_PROTOCOL")? {
            config.protocol = protocol;
        }
        if let Some(size) = parse_var(&lookup, "QC_SUBSCRIPTION_READ_BUFFER")? {
            config.read_buffer_size = size;
        }
        if let Some(capacity) = parse_var(&lookup, "QC_SUBSCRIPTION_SEND_QUEUE")? {
            config.send_queue_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}
