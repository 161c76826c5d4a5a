//! CLI definitions and configuration surface for wsbridge.
//!
//! Every knob is available both as a flag and as a `WSBRIDGE_*` environment
//! variable, all optional with defaults matching the original deployment
//! (listen on 8080, backend VNC on loopback 5901).

use clap::{builder::PossibleValuesParser, Parser};
use std::time::Duration;

use crate::buffer::DEFAULT_MAX_BUFFER_BYTES;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = ":8080";

/// Default backend host.
pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";

/// Default backend port.
pub const DEFAULT_BACKEND_PORT: u16 = 5901;

/// Default base reconnect delay.
pub const DEFAULT_BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default maximum reconnect delay.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(16);

/// Default maximum reconnect attempts per outage.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 15;

/// Default keepalive probe interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default idle-log sampling interval.
pub const DEFAULT_IDLE_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Default backend read timeout (no data for this long counts as a close).
pub const DEFAULT_BACKEND_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Default backend connect timeout.
pub const DEFAULT_BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse a duration from a human-readable string.
fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Reconnecting WebSocket to TCP byte-stream relay.
#[derive(Debug, Parser)]
#[command(name = "wsbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (debug|info|warn|error)
    #[arg(long, env = "WSBRIDGE_LOG_LEVEL", default_value = "info", value_parser = PossibleValuesParser::new(["debug", "info", "warn", "error"]))]
    pub log_level: String,

    /// WebSocket listen address (e.g., :8080 or 127.0.0.1:8080)
    #[arg(long, env = "WSBRIDGE_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Backend TCP host
    #[arg(long, env = "WSBRIDGE_BACKEND_HOST", default_value = DEFAULT_BACKEND_HOST)]
    pub backend_host: String,

    /// Backend TCP port
    #[arg(long, env = "WSBRIDGE_BACKEND_PORT", default_value_t = DEFAULT_BACKEND_PORT)]
    pub backend_port: u16,

    /// Base reconnect delay
    #[arg(long, env = "WSBRIDGE_BASE_RECONNECT_DELAY", value_parser = parse_duration, default_value = "1s")]
    pub base_reconnect_delay: Duration,

    /// Maximum reconnect delay (backoff cap)
    #[arg(long, env = "WSBRIDGE_MAX_RECONNECT_DELAY", value_parser = parse_duration, default_value = "16s")]
    pub max_reconnect_delay: Duration,

    /// Maximum reconnect attempts before a session goes degraded
    #[arg(long, env = "WSBRIDGE_MAX_RECONNECT_ATTEMPTS", default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,

    /// Client data buffer ceiling in bytes (oldest chunks shed when exceeded)
    #[arg(long, env = "WSBRIDGE_MAX_BUFFER_BYTES", default_value_t = DEFAULT_MAX_BUFFER_BYTES)]
    pub max_buffer_bytes: usize,

    /// WebSocket keepalive probe interval
    #[arg(long, env = "WSBRIDGE_PING_INTERVAL", value_parser = parse_duration, default_value = "15s")]
    pub ping_interval: Duration,

    /// Idle-duration sampling interval for observability logging
    #[arg(long, env = "WSBRIDGE_IDLE_LOG_INTERVAL", value_parser = parse_duration, default_value = "30s")]
    pub idle_log_interval: Duration,

    /// Backend read timeout (no data for this long is treated as a close)
    #[arg(long, env = "WSBRIDGE_BACKEND_READ_TIMEOUT", value_parser = parse_duration, default_value = "60s")]
    pub backend_read_timeout: Duration,

    /// Backend connect timeout
    #[arg(long, env = "WSBRIDGE_BACKEND_CONNECT_TIMEOUT", value_parser = parse_duration, default_value = "10s")]
    pub backend_connect_timeout: Duration,
}

/// Runtime configuration shared by the server and every session.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub max_buffer_bytes: usize,
    pub ping_interval: Duration,
    pub idle_log_interval: Duration,
    pub backend_read_timeout: Duration,
    pub backend_connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
            base_reconnect_delay: DEFAULT_BASE_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            ping_interval: DEFAULT_PING_INTERVAL,
            idle_log_interval: DEFAULT_IDLE_LOG_INTERVAL,
            backend_read_timeout: DEFAULT_BACKEND_READ_TIMEOUT,
            backend_connect_timeout: DEFAULT_BACKEND_CONNECT_TIMEOUT,
        }
    }
}

impl Cli {
    pub fn into_config(self) -> Config {
        Config {
            listen: self.listen,
            backend_host: self.backend_host,
            backend_port: self.backend_port,
            base_reconnect_delay: self.base_reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
            max_reconnect_attempts: self.max_reconnect_attempts,
            max_buffer_bytes: self.max_buffer_bytes,
            ping_interval: self.ping_interval,
            idle_log_interval: self.idle_log_interval,
            backend_read_timeout: self.backend_read_timeout,
            backend_connect_timeout: self.backend_connect_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["wsbridge"]).unwrap();
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.listen, ":8080");
        assert_eq!(cli.backend_host, "127.0.0.1");
        assert_eq!(cli.backend_port, 5901);
        assert_eq!(cli.base_reconnect_delay, Duration::from_secs(1));
        assert_eq!(cli.max_reconnect_delay, Duration::from_secs(16));
        assert_eq!(cli.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
        assert_eq!(cli.max_buffer_bytes, 1024 * 1024);
        assert_eq!(cli.ping_interval, Duration::from_secs(15));
        assert_eq!(cli.idle_log_interval, Duration::from_secs(30));
        assert_eq!(cli.backend_read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_full() {
        let cli = Cli::try_parse_from([
            "wsbridge",
            "--log-level",
            "debug",
            "--listen",
            "0.0.0.0:9000",
            "--backend-host",
            "10.0.0.2",
            "--backend-port",
            "5900",
            "--base-reconnect-delay",
            "500ms",
            "--max-reconnect-delay",
            "8s",
            "--max-reconnect-attempts",
            "5",
            "--max-buffer-bytes",
            "2048",
            "--ping-interval",
            "20s",
            "--idle-log-interval",
            "1m",
            "--backend-read-timeout",
            "30s",
            "--backend-connect-timeout",
            "2s",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.listen, "0.0.0.0:9000");
        assert_eq!(cli.backend_host, "10.0.0.2");
        assert_eq!(cli.backend_port, 5900);
        assert_eq!(cli.base_reconnect_delay, Duration::from_millis(500));
        assert_eq!(cli.max_reconnect_delay, Duration::from_secs(8));
        assert_eq!(cli.max_reconnect_attempts, 5);
        assert_eq!(cli.max_buffer_bytes, 2048);
        assert_eq!(cli.ping_interval, Duration::from_secs(20));
        assert_eq!(cli.idle_log_interval, Duration::from_secs(60));
        assert_eq!(cli.backend_read_timeout, Duration::from_secs(30));
        assert_eq!(cli.backend_connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_duration_parsing_mixed_units() {
        let cli = Cli::try_parse_from(["wsbridge", "--base-reconnect-delay", "1m30s"]).unwrap();
        assert_eq!(cli.base_reconnect_delay, Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        assert!(Cli::try_parse_from(["wsbridge", "--log-level", "verbose"]).is_err());
    }

    #[test]
    fn test_into_config() {
        let cli = Cli::try_parse_from(["wsbridge", "--backend-port", "4000"]).unwrap();
        let config = cli.into_config();
        assert_eq!(config.backend_port, 4000);
        assert_eq!(config.backend_host, "127.0.0.1");
    }

    #[test]
    fn test_config_default_matches_cli_defaults() {
        let from_cli = Cli::try_parse_from(["wsbridge"]).unwrap().into_config();
        let default = Config::default();
        assert_eq!(from_cli.listen, default.listen);
        assert_eq!(from_cli.backend_port, default.backend_port);
        assert_eq!(from_cli.max_buffer_bytes, default.max_buffer_bytes);
        assert_eq!(from_cli.max_reconnect_attempts, default.max_reconnect_attempts);
    }
}
