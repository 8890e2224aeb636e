//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use consolidation::DEFAULT_CACHE_TTL;
use messaging::ChannelSettings;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs everything in memory
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default `10`)
/// - `CACHE_TTL_SECS`, `CACHE_CAPACITY`: read cache policy (default 1800 s, 10000 days)
/// - `MESSAGE_TTL_MS`, `PREFETCH`, `REDELIVERY_DELAY_MS`: broker policy
///   (default 30000 ms, 100, 1000 ms)
/// - `QUEUE_NAME`, `DEAD_LETTER_QUEUE`: broker destinations
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub channel: ChannelSettings,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let mut channel = defaults.channel.clone();
        if let Some(ms) = parsed("MESSAGE_TTL_MS") {
            channel = channel.with_message_ttl(Duration::from_millis(ms));
        }
        if let Some(prefetch) = parsed("PREFETCH") {
            channel = channel.with_prefetch(usize::try_from(prefetch).unwrap_or(usize::MAX));
        }
        if let Some(ms) = parsed("REDELIVERY_DELAY_MS") {
            channel = channel.with_redelivery_delay(Duration::from_millis(ms));
        }
        if let Some(queue) = lookup("QUEUE_NAME") {
            channel = channel.with_queue(queue);
        }
        if let Some(queue) = lookup("DEAD_LETTER_QUEUE") {
            channel = channel.with_dead_letter_queue(queue);
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            cache_ttl: parsed("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_capacity: parsed("CACHE_CAPACITY").unwrap_or(defaults.cache_capacity),
            channel,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: 10_000,
            channel: ChannelSettings::default(),
        }
    }
}
