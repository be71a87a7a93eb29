//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::MatchConfig;
use crate::session::SessionConfig;
use crate::util::rate_limit::DEFAULT_INPUT_RATE_LIMIT;
use crate::ws::pump::PumpConfig;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Allowed client origin for CORS; any origin when unset
    pub client_origin: Option<String>,

    pub sessions: SessionConfig,
    pub pump: PumpConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let match_defaults = MatchConfig::default();
        let session_defaults = SessionConfig::default();
        let pump_defaults = PumpConfig::default();

        let game = MatchConfig {
            tick_rate: parse(&lookup, "TICK_RATE", match_defaults.tick_rate)?,
            command_queue_capacity: parse(
                &lookup,
                "COMMAND_QUEUE_CAPACITY",
                match_defaults.command_queue_capacity,
            )?,
            snapshot_queue_capacity: match_defaults.snapshot_queue_capacity,
        };
        if game.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }

        let sessions = SessionConfig {
            max_sessions: parse(&lookup, "MAX_SESSIONS", session_defaults.max_sessions)?,
            idle_timeout: parse_secs(
                &lookup,
                "SESSION_IDLE_TIMEOUT_SECS",
                session_defaults.idle_timeout,
            )?,
            sweep_interval: parse_secs(
                &lookup,
                "SESSION_SWEEP_INTERVAL_SECS",
                session_defaults.sweep_interval,
            )?,
            code_length: session_defaults.code_length,
            game,
        };
        if sessions.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("SESSION_SWEEP_INTERVAL_SECS"));
        }

        let pump = PumpConfig {
            max_frame_bytes: parse(&lookup, "MAX_FRAME_BYTES", pump_defaults.max_frame_bytes)?,
            pong_wait: parse_secs(&lookup, "PONG_WAIT_SECS", pump_defaults.pong_wait)?,
            write_wait: pump_defaults.write_wait,
            outbound_capacity: parse(
                &lookup,
                "OUTBOUND_QUEUE_CAPACITY",
                pump_defaults.outbound_capacity,
            )?,
            input_rate_limit: parse(&lookup, "INPUT_RATE_LIMIT", DEFAULT_INPUT_RATE_LIMIT)?,
        };
        if pump.pong_wait.is_zero() {
            return Err(ConfigError::Invalid("PONG_WAIT_SECS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: parse(&lookup, "LOG_FORMAT", LogFormat::default())?,
            client_origin: lookup("CLIENT_ORIGIN").filter(|origin| !origin.trim().is_empty()),

            sessions,
            pump,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn parse_secs<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
