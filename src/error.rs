//! Error taxonomy
//!
//! Only configuration and link-open failures ever reach the binary as errors.
//! Everything that can happen mid-tick is folded into state by its owner.

use thiserror::Error;

/// Fatal, startup-time configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: f64 },

    #[error("max_leds ({max_leds}) is below base_walk_leds ({base_walk_leds})")]
    LedLimits { max_leds: u32, base_walk_leds: u32 },

    #[error("{inner} ({inner_ms} ms) does not fit inside {outer} ({outer_ms} ms)")]
    DoesNotFit {
        inner: &'static str,
        inner_ms: f64,
        outer: &'static str,
        outer_ms: f64,
    },

    #[error("crowd_bonus_factor must not be negative (got {0})")]
    NegativeCrowdBonus(f64),

    #[error("presence_channels ({0}) exceeds the 6 presence inputs of the sensor line")]
    TooManyPresenceChannels(usize),

    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Serial link failures
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no serial port found")]
    NoPort,

    #[error("cannot open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("link i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An inbound line that does not follow the `S ...` / `B n` grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed protocol line {line:?}: {reason}")]
pub struct ProtocolError {
    pub line: String,
    pub reason: &'static str,
}

impl ProtocolError {
    pub fn new(line: &str, reason: &'static str) -> Self {
        Self {
            line: line.to_string(),
            reason,
        }
    }
}

/// Vision worker faults; the aggregator treats any of these as "vision absent"
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("cannot start person counter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("person counter stream ended")]
    StreamEnded,

    #[error("person counter i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("person counter produced {0:?}, expected a non-negative integer")]
    BadCount(String),
}
