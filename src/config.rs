//! Runtime configuration.
//!
//! Every option can be given on the command line or through a `KEYTRAIL_*` environment
//! variable:
//!
//! ```bash
//! KEYTRAIL_LOG_DIR=/var/log/keytrail keytrail --keyboards-only --idle-flush 2.5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::shutdown::ShutdownMode;

pub const DEFAULT_KEY_CODES: &str = "/usr/include/linux/input-event-codes.h";
pub const DEFAULT_REGISTRY: &str = "/proc/bus/input/devices";
pub const DEFAULT_DEVICE_DIR: &str = "/dev/input";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_IDLE_FLUSH: Duration = Duration::from_secs(5);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Longest idle interval or grace period accepted: one day.
pub const MAX_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "keytrail",
    version,
    about = "Record the keys pressed on every input device into per-device log files"
)]
pub struct Config {
    /// Header defining the KEY_* and BTN_* codes.
    #[arg(long, env = "KEYTRAIL_KEY_CODES", default_value = DEFAULT_KEY_CODES)]
    pub key_codes: PathBuf,

    /// Registry listing the input devices and their handlers.
    #[arg(long, env = "KEYTRAIL_REGISTRY", default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,

    /// Directory holding the event devices.
    #[arg(long, env = "KEYTRAIL_DEVICE_DIR", default_value = DEFAULT_DEVICE_DIR)]
    pub device_dir: PathBuf,

    /// Directory the per-device logs are written to.
    #[arg(long, env = "KEYTRAIL_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Seconds without a key press after which the current line is terminated and flushed.
    #[arg(long, env = "KEYTRAIL_IDLE_FLUSH", default_value = "5", value_parser = parse_seconds)]
    pub idle_flush: Duration,

    /// Key names queued per device before its reader waits for the writer.
    #[arg(long, env = "KEYTRAIL_CHANNEL_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY, value_parser = parse_capacity)]
    pub channel_capacity: usize,

    /// Only watch devices that advertise keyboard capabilities.
    #[arg(long, env = "KEYTRAIL_KEYBOARDS_ONLY")]
    pub keyboards_only: bool,

    /// Behaviour on SIGINT/SIGTERM.
    #[arg(long, env = "KEYTRAIL_SHUTDOWN", value_enum, default_value_t = ShutdownMode::Graceful)]
    pub shutdown: ShutdownMode,

    /// Seconds a graceful shutdown waits for the devices to drain.
    #[arg(long, env = "KEYTRAIL_GRACE", default_value = "2", value_parser = parse_seconds)]
    pub grace: Duration,

    /// Log level (`RUST_LOG` takes precedence).
    #[arg(long, env = "KEYTRAIL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_codes: PathBuf::from(DEFAULT_KEY_CODES),
            registry: PathBuf::from(DEFAULT_REGISTRY),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            idle_flush: DEFAULT_IDLE_FLUSH,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            keyboards_only: false,
            shutdown: ShutdownMode::default(),
            grace: DEFAULT_GRACE,
            log_level: "info".to_string(),
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid number of seconds: {e}"))?;

    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("expected a positive number of seconds, got {s}"));
    }

    if secs > MAX_SECONDS {
        return Err(format!("at most {MAX_SECONDS} seconds are allowed, got {s}"));
    }

    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid number of seconds: {e}"))
}

fn parse_capacity(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("capacity must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid capacity: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_system_constants() {
        let config = Config::default();

        assert_eq!(config.key_codes, PathBuf::from(DEFAULT_KEY_CODES));
        assert_eq!(config.registry, PathBuf::from(DEFAULT_REGISTRY));
        assert_eq!(config.idle_flush, Duration::from_secs(5));
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.shutdown, ShutdownMode::Graceful);
    }

    #[test]
    fn parses_command_line_overrides() {
        let config = Config::try_parse_from([
            "keytrail",
            "--log-dir",
            "/tmp/keys",
            "--idle-flush",
            "0.5",
            "--channel-capacity",
            "8",
            "--keyboards-only",
            "--shutdown",
            "fast-exit",
        ])
        .unwrap();

        assert_eq!(config.log_dir, PathBuf::from("/tmp/keys"));
        assert_eq!(config.idle_flush, Duration::from_millis(500));
        assert_eq!(config.channel_capacity, 8);
        assert!(config.keyboards_only);
        assert_eq!(config.shutdown, ShutdownMode::FastExit);
    }

    #[test]
    fn rejects_degenerate_values() {
        assert!(Config::try_parse_from(["keytrail", "--channel-capacity", "0"]).is_err());
        assert!(Config::try_parse_from(["keytrail", "--idle-flush", "0"]).is_err());
        assert!(Config::try_parse_from(["keytrail", "--grace", "-1"]).is_err());
        assert!(Config::try_parse_from(["keytrail", "--grace", "1e30"]).is_err());
        assert!(Config::try_parse_from(["keytrail", "--idle-flush", "1e19"]).is_err());
        assert!(Config::try_parse_from(["keytrail", "--idle-flush", "86401"]).is_err());
    }

    #[test]
    fn accepts_the_longest_interval() {
        let config = Config::try_parse_from(["keytrail", "--grace", "86400"]).unwrap();

        assert_eq!(config.grace, Duration::from_secs(86_400));
    }
}
