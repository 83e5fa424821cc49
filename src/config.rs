use std::time::Duration;

use clap::{Args, ValueEnum};
use thiserror::Error;

use crate::PeerId;

pub const DEFAULT_PEER_ID: &PeerId = b"00112233445566778899";
pub const DEFAULT_PORT: u16 = 6881;

/// Bounds on every blocking step of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// opening the tcp connection
    pub connect: Duration,
    /// the handshake reply and every message read afterwards
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// human readable lines
    #[default]
    Console,
    /// one json object per event
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// a tracing filter directive, `RUST_LOG` takes precedence when set
    pub level: String,
    pub format: LogFormat,
}

/// Everything the client needs besides the torrent itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// the id we send in the handshake and to the tracker
    pub peer_id: PeerId,
    /// the port we announce to the tracker
    pub port: u16,
    pub timeouts: Timeouts,
    pub tracker_timeout: Duration,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: *DEFAULT_PEER_ID,
            port: DEFAULT_PORT,
            timeouts: Timeouts::default(),
            tracker_timeout: Duration::from_secs(15),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Console,
            },
        }
    }
}

/// The global command line flags, each one falls back to an environment variable.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// The 20 byte peer id sent to trackers and peers
    #[arg(long, env = "BT_PEER_ID", global = true)]
    pub peer_id: Option<String>,

    /// The port announced to the tracker
    #[arg(long, env = "BT_PORT", global = true)]
    pub port: Option<u16>,

    /// Seconds to wait for a peer connection to open
    #[arg(long, env = "BT_CONNECT_TIMEOUT", global = true)]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait for the next message of a peer
    #[arg(long, env = "BT_READ_TIMEOUT", global = true)]
    pub read_timeout: Option<u64>,

    /// Seconds to wait for the tracker response
    #[arg(long, env = "BT_TRACKER_TIMEOUT", global = true)]
    pub tracker_timeout: Option<u64>,

    /// Log filter, e.g. `info` or `bittorrent_piece=debug`
    #[arg(long, env = "BT_LOG", global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, env = "BT_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,
}

impl ClientConfig {
    /// applies the given flags on top of the defaults
    pub fn from_args(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(peer_id) = &args.peer_id {
            config.peer_id = peer_id
                .as_bytes()
                .try_into()
                .map_err(|_| ConfigError::PeerIdLength(peer_id.len()))?;
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(secs) = args.connect_timeout {
            config.timeouts.connect = Duration::from_secs(secs);
        }
        if let Some(secs) = args.read_timeout {
            config.timeouts.read = Duration::from_secs(secs);
        }
        if let Some(secs) = args.tracker_timeout {
            config.tracker_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = args.log_format {
            config.logging.format = format;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("connect", self.timeouts.connect),
            ("read", self.timeouts.read),
            ("tracker", self.tracker_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::EmptyLogLevel);
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("The peer id has to be exactly 20 bytes long, got {0}")]
    PeerIdLength(usize),
    #[error("The {0} timeout must be greater than 0")]
    ZeroTimeout(&'static str),
    #[error("The log level must not be empty")]
    EmptyLogLevel,
}
