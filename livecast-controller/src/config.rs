//! Controller configuration
//!
//! Defines all configurable parameters for the controller including
//! state locations, encoder invocation, control loop cadence and the
//! remote platform connection.

use chrono::{DateTime, FixedOffset, Local, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
///
/// Every value has a default so the controller starts with no environment
/// at all; the environment only overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the registry, tracking files and encoder logs
    pub state_dir: PathBuf,

    /// Directory scanned for media files by `GET /api/videos`
    pub media_dir: PathBuf,

    /// Address the HTTP API binds to
    pub bind_addr: String,

    /// Encoder executable (ffmpeg compatible)
    pub encoder_program: String,

    /// Ingest endpoint the stream key is appended to
    pub ingest_url: String,

    /// How often the control loop activates on its own
    pub tick_interval: Duration,

    /// How long `stop` waits after SIGTERM before SIGKILL
    pub stop_grace: Duration,

    /// Poll interval for encoders adopted after a controller restart
    pub adopt_poll_interval: Duration,

    /// Fixed UTC offset for schedule evaluation, host local time when unset
    pub schedule_offset: Option<FixedOffset>,

    /// Delay between encoder start and the `testing` transition
    pub broadcast_settle: Duration,

    /// Delay between the `testing` and `live` transitions
    pub broadcast_step: Duration,

    /// Backoff before the single retry of a transient platform failure
    pub broadcast_retry_backoff: Duration,

    /// Platform API base URL
    pub platform_url: String,

    /// Directory with one `<channel>.token` bearer token per channel
    pub token_dir: PathBuf,
}

impl Config {
    /// Creates a new configuration with defaults rooted at `state_dir`
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            token_dir: state_dir.join("tokens"),
            state_dir,
            media_dir: PathBuf::from("."),
            bind_addr: "127.0.0.1:8090".to_string(),
            encoder_program: "ffmpeg".to_string(),
            ingest_url: "rtmp://a.rtmp.youtube.com/live2".to_string(),
            tick_interval: Duration::from_secs(30),
            stop_grace: Duration::from_secs(2),
            adopt_poll_interval: Duration::from_secs(5),
            schedule_offset: None,
            broadcast_settle: Duration::from_secs(10),
            broadcast_step: Duration::from_secs(5),
            broadcast_retry_backoff: Duration::from_secs(3),
            platform_url: "https://www.googleapis.com/youtube/v3".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised environment variables:
    /// - LIVECAST_STATE_DIR (default: ./livecast-state)
    /// - LIVECAST_MEDIA_DIR (default: .)
    /// - LIVECAST_BIND_ADDR (default: 127.0.0.1:8090)
    /// - LIVECAST_ENCODER (default: ffmpeg)
    /// - LIVECAST_INGEST_URL (default: rtmp://a.rtmp.youtube.com/live2)
    /// - LIVECAST_TICK_INTERVAL (seconds, default: 30)
    /// - LIVECAST_STOP_GRACE (milliseconds, default: 2000)
    /// - LIVECAST_SCHEDULE_UTC_OFFSET (e.g. +07:00, default: host local time)
    /// - LIVECAST_BROADCAST_SETTLE (seconds, default: 10)
    /// - LIVECAST_BROADCAST_STEP (seconds, default: 5)
    /// - LIVECAST_PLATFORM_URL (default: https://www.googleapis.com/youtube/v3)
    /// - LIVECAST_PLATFORM_TOKEN_DIR (default: <state_dir>/tokens)
    pub fn from_env() -> anyhow::Result<Self> {
        let state_dir = std::env::var("LIVECAST_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("livecast-state"));

        let mut config = Self::new(state_dir);

        if let Ok(dir) = std::env::var("LIVECAST_MEDIA_DIR") {
            config.media_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("LIVECAST_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(program) = std::env::var("LIVECAST_ENCODER") {
            config.encoder_program = program;
        }
        if let Ok(url) = std::env::var("LIVECAST_INGEST_URL") {
            config.ingest_url = url;
        }
        if let Ok(url) = std::env::var("LIVECAST_PLATFORM_URL") {
            config.platform_url = url;
        }
        if let Ok(dir) = std::env::var("LIVECAST_PLATFORM_TOKEN_DIR") {
            config.token_dir = PathBuf::from(dir);
        }

        config.tick_interval = env_duration("LIVECAST_TICK_INTERVAL", Duration::from_secs)
            .unwrap_or(config.tick_interval);
        config.stop_grace = env_duration("LIVECAST_STOP_GRACE", Duration::from_millis)
            .unwrap_or(config.stop_grace);
        config.broadcast_settle = env_duration("LIVECAST_BROADCAST_SETTLE", Duration::from_secs)
            .unwrap_or(config.broadcast_settle);
        config.broadcast_step = env_duration("LIVECAST_BROADCAST_STEP", Duration::from_secs)
            .unwrap_or(config.broadcast_step);

        if let Ok(raw) = std::env::var("LIVECAST_SCHEDULE_UTC_OFFSET") {
            let offset = parse_utc_offset(&raw).ok_or_else(|| {
                anyhow::anyhow!("LIVECAST_SCHEDULE_UTC_OFFSET '{}' is not of the form +HH:MM", raw)
            })?;
            config.schedule_offset = Some(offset);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.encoder_program.trim().is_empty() {
            anyhow::bail!("encoder_program cannot be empty");
        }

        if self.ingest_url.trim().is_empty() {
            anyhow::bail!("ingest_url cannot be empty");
        }

        if !self.platform_url.starts_with("http://") && !self.platform_url.starts_with("https://")
        {
            anyhow::bail!("platform_url must start with http:// or https://");
        }

        if self.tick_interval.is_zero() {
            anyhow::bail!("tick_interval must be greater than 0");
        }

        if self.adopt_poll_interval.is_zero() {
            anyhow::bail!("adopt_poll_interval must be greater than 0");
        }

        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("jobs.json")
    }

    pub fn tracking_dir(&self) -> PathBuf {
        self.state_dir.join("tracking")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Current time in the schedule timezone
    pub fn schedule_now(&self) -> DateTime<FixedOffset> {
        schedule_now(self.schedule_offset)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from("livecast-state"))
    }
}

/// Current time at `offset`, or in host local time
pub fn schedule_now(offset: Option<FixedOffset>) -> DateTime<FixedOffset> {
    match offset {
        Some(offset) => Utc::now().with_timezone(&offset),
        None => Local::now().fixed_offset(),
    }
}

/// Parses `+HH:MM`, `-HH:MM`, `+HHMM` or `+HH`
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.chars().next()? {
        '+' => (1, &raw[1..]),
        '-' => (-1, &raw[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (
            digits[..2].parse::<i32>().ok()?,
            digits[2..].parse::<i32>().ok()?,
        ),
        _ => return None,
    };

    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn env_duration(name: &str, unit: fn(u64) -> Duration) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.encoder_program, "ffmpeg");
        assert_eq!(config.registry_path(), PathBuf::from("livecast-state/jobs.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.encoder_program = String::new();
        assert!(config.validate().is_err());

        config.encoder_program = "ffmpeg".to_string();
        config.platform_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.platform_url = "http://localhost:9000".to_string();
        assert!(config.validate().is_ok());

        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+07:00"), FixedOffset::east_opt(7 * 3600));
        assert_eq!(parse_utc_offset("-0330"), FixedOffset::east_opt(-(3 * 3600 + 1800)));
        assert_eq!(parse_utc_offset("+05"), FixedOffset::east_opt(5 * 3600));
        assert!(parse_utc_offset("07:00").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
        assert!(parse_utc_offset("+ab:cd").is_none());
    }

    #[test]
    fn test_schedule_now_uses_fixed_offset() {
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let now = schedule_now(Some(offset));
        assert_eq!(now.offset(), &offset);
    }
}
