use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_relay::ingestors::PollerOptions;
use lib_relay::loggers::LoggingOptions;

/// Every setting as it may come from the config file, the environment or the
/// command line. Unset values fall through to the next layer.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Holyrics live text relay: polls the presentation server and pushes slides over WebSocket", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PORT", help = "Port to listen on for subscriber connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LYRICS_URL", help = "Host name or address of the presentation server.")]
    pub lyrics_url: Option<String>,

    #[clap(long, env = "LYRICS_PORT", help = "Port of the presentation server's API.")]
    pub lyrics_port: Option<u16>,

    #[clap(long, env = "RELAY_POLL_INTERVAL_MS", help = "Milliseconds between two polls of the presentation server.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "RELAY_FETCH_TIMEOUT_MS", help = "Timeout in milliseconds for one request to the presentation server.")]
    pub fetch_timeout_ms: Option<u64>,

    #[clap(long, env = "RELAY_ERROR_QUIET_SECS", help = "Seconds between two reports of the same upstream outage.")]
    pub error_quiet_secs: Option<u64>,

    #[clap(long, env = "RELAY_SUBSCRIBER_BUFFER", help = "Payloads a subscriber may have queued before it is dropped as too slow.")]
    pub subscriber_buffer: Option<usize>,

    #[clap(long, env = "RELAY_PUBLIC_DIR", help = "Directory with the subscriber UI's static files.")]
    pub public_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    /// The built-in fallback for every setting.
    pub fn defaults() -> Config {
        Config {
            port: Some(3000),
            config_path: None,
            lyrics_url: Some("localhost".to_string()),
            lyrics_port: Some(4747),
            poll_interval_ms: Some(200),
            fetch_timeout_ms: Some(2000),
            error_quiet_secs: Some(5),
            subscriber_buffer: Some(16),
            public_dir: Some(PathBuf::from("./public")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    pub fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            lyrics_url: other.lyrics_url.or(self.lyrics_url),
            lyrics_port: other.lyrics_port.or(self.lyrics_port),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            fetch_timeout_ms: other.fetch_timeout_ms.or(self.fetch_timeout_ms),
            error_quiet_secs: other.error_quiet_secs.or(self.error_quiet_secs),
            subscriber_buffer: other.subscriber_buffer.or(self.subscriber_buffer),
            public_dir: other.public_dir.or(self.public_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }
}

/// Fully resolved settings; every value is present and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub lyrics_url: String,
    pub lyrics_port: u16,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub error_quiet_window: Duration,
    pub subscriber_buffer: usize,
    pub public_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Settings {
    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            host: self.lyrics_url.clone(),
            port: self.lyrics_port,
            interval: self.poll_interval,
            fetch_timeout: self.fetch_timeout,
            error_quiet_window: self.error_quiet_window,
        }
    }

    pub fn logging_options(&self, app_name: &str) -> LoggingOptions {
        LoggingOptions {
            app_name: app_name.to_string(),
            log_dir: self.log_dir.clone(),
            level: self.log_level.clone(),
        }
    }
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    // Missing values are filled from the defaults first.
    fn try_from(config: Config) -> Result<Settings> {
        let c = Config::defaults().merge(config);
        let defaults = Config::defaults();

        let poll_interval_ms = c.poll_interval_ms.or(defaults.poll_interval_ms).unwrap_or(200);
        if poll_interval_ms == 0 {
            bail!("poll interval must be at least 1 ms");
        }
        let subscriber_buffer = c.subscriber_buffer.or(defaults.subscriber_buffer).unwrap_or(16);
        if subscriber_buffer == 0 {
            bail!("subscriber buffer must hold at least one payload");
        }
        let lyrics_url = c.lyrics_url.unwrap_or_else(|| "localhost".to_string());
        if lyrics_url.trim().is_empty() {
            bail!("presentation server host must not be empty");
        }

        Ok(Settings {
            port: c.port.unwrap_or(3000),
            lyrics_url,
            lyrics_port: c.lyrics_port.unwrap_or(4747),
            poll_interval: Duration::from_millis(poll_interval_ms),
            fetch_timeout: Duration::from_millis(c.fetch_timeout_ms.unwrap_or(2000)),
            error_quiet_window: Duration::from_secs(c.error_quiet_secs.unwrap_or(5)),
            subscriber_buffer,
            public_dir: c.public_dir.unwrap_or_else(|| PathBuf::from("./public")),
            log_dir: c.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: c.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Reads a JSON config file. A missing file is not an error.
pub fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let config = serde_json::from_str::<Config>(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(Some(config))
}

/// Layers defaults, the optional config file and CLI/environment.
///
/// Runs before logging is set up, so problems with the file are returned in
/// the error rather than logged.
pub fn load_settings() -> Result<Settings> {
    // clap already folds the environment into the parsed arguments.
    let cli = Config::parse();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_lyrics.conf"));

    let mut current = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current = current.merge(file_config);
    }
    current = current.merge(cli);

    Settings::try_from(current)
}
