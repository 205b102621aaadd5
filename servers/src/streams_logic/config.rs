use clap::Parser;
use lib_streams::core::{EngineSettings, SettingsError};
use lib_streams::retrieve::RetrySettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "server_streams.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Upstream base URL is not set (--upstream-url / STREAMS_UPSTREAM_URL)")]
    MissingUpstreamUrl,

    #[error("Market stream is enabled but no locations are configured (--market-locations / STREAMS_MARKET_LOCATIONS)")]
    MissingMarketLocations,

    #[error("No stream is enabled")]
    NoStreamEnabled,

    #[error("Invalid settings for stream '{stream}': {source}")]
    Settings {
        stream: String,
        #[source]
        source: SettingsError,
    },
}

/// The streams served by this binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    FlightPlans,
    Market,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::FlightPlans, StreamKind::Market];

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::FlightPlans => "flightplans",
            StreamKind::Market => "market",
        }
    }
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Flight plan and marketplace change streams over WebSocket", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "STREAMS_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "STREAMS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STREAMS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STREAMS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STREAMS_UPSTREAM_URL", help = "Base URL of the upstream game API.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "STREAMS_UPSTREAM_TOKEN", help = "Bearer token for the upstream game API.")]
    pub upstream_token: Option<String>,

    #[clap(long, env = "STREAMS_REDIS_URL", help = "Redis URL for durable state. In-memory state when unset.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "STREAMS_FLIGHTPLANS_ENABLED", help = "Serve the flight plan stream.")]
    pub flightplans_enabled: Option<bool>,

    #[clap(long, env = "STREAMS_FLIGHTPLAN_SYSTEMS", value_delimiter = ',', help = "Systems to poll for flight plans. Discovered upstream when unset.")]
    pub flightplan_systems: Option<Vec<String>>,

    #[clap(long, env = "STREAMS_FLIGHTPLANS_POLL_MS", help = "Pause between flight plan cycles in milliseconds.")]
    pub flightplans_poll_ms: Option<u64>,

    #[clap(long, env = "STREAMS_FLIGHTPLANS_BUDGET_SECS", help = "Execution budget of one flight plan generation in seconds.")]
    pub flightplans_budget_secs: Option<u64>,

    #[clap(long, env = "STREAMS_MARKET_ENABLED", help = "Serve the marketplace stream.")]
    pub market_enabled: Option<bool>,

    #[clap(long, env = "STREAMS_MARKET_LOCATIONS", value_delimiter = ',', help = "Locations whose marketplaces are polled.")]
    pub market_locations: Option<Vec<String>>,

    #[clap(long, env = "STREAMS_MARKET_POLL_MS", help = "Pause between marketplace cycles in milliseconds.")]
    pub market_poll_ms: Option<u64>,

    #[clap(long, env = "STREAMS_MARKET_BUDGET_SECS", help = "Execution budget of one marketplace generation in seconds.")]
    pub market_budget_secs: Option<u64>,

    #[clap(long, env = "STREAMS_SAFETY_MARGIN_MS", help = "Remaining budget in milliseconds at which a generation hands off.")]
    pub safety_margin_ms: Option<u64>,

    #[clap(long, env = "STREAMS_WATCHDOG_SECS", help = "Watchdog interval in seconds.")]
    pub watchdog_secs: Option<u64>,

    #[clap(long, env = "STREAMS_LEASE_GRACE_SECS", help = "Lease time past the budget, and the window a successor has to claim it. Raised to the worst-case retry backoff.")]
    pub lease_grace_secs: Option<u64>,

    #[clap(long, env = "STREAMS_MAX_RETRIES", help = "Retry cap for upstream requests.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "STREAMS_MIN_BACKOFF_MS", help = "Smallest retry backoff in milliseconds.")]
    pub min_backoff_ms: Option<u64>,

    #[clap(long, env = "STREAMS_MAX_BACKOFF_MS", help = "Largest retry backoff in milliseconds.")]
    pub max_backoff_ms: Option<u64>,
}

impl Config {
    pub fn defaults() -> Config {
        Config {
            port: Some(9003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            upstream_url: Some("https://api.spacetraders.io/".to_string()),
            flightplans_enabled: Some(true),
            flightplans_poll_ms: Some(500),
            flightplans_budget_secs: Some(15 * 60),
            market_enabled: Some(false),
            market_poll_ms: Some(3000),
            market_budget_secs: Some(5 * 60),
            safety_margin_ms: Some(5000),
            watchdog_secs: Some(60),
            lease_grace_secs: Some(30),
            max_retries: Some(10),
            min_backoff_ms: Some(100),
            max_backoff_ms: Some(30_000),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            upstream_url: other.upstream_url.or(self.upstream_url),
            upstream_token: other.upstream_token.or(self.upstream_token),
            redis_url: other.redis_url.or(self.redis_url),
            flightplans_enabled: other.flightplans_enabled.or(self.flightplans_enabled),
            flightplan_systems: other.flightplan_systems.or(self.flightplan_systems),
            flightplans_poll_ms: other.flightplans_poll_ms.or(self.flightplans_poll_ms),
            flightplans_budget_secs: other.flightplans_budget_secs.or(self.flightplans_budget_secs),
            market_enabled: other.market_enabled.or(self.market_enabled),
            market_locations: other.market_locations.or(self.market_locations),
            market_poll_ms: other.market_poll_ms.or(self.market_poll_ms),
            market_budget_secs: other.market_budget_secs.or(self.market_budget_secs),
            safety_margin_ms: other.safety_margin_ms.or(self.safety_margin_ms),
            watchdog_secs: other.watchdog_secs.or(self.watchdog_secs),
            lease_grace_secs: other.lease_grace_secs.or(self.lease_grace_secs),
            max_retries: other.max_retries.or(self.max_retries),
            min_backoff_ms: other.min_backoff_ms.or(self.min_backoff_ms),
            max_backoff_ms: other.max_backoff_ms.or(self.max_backoff_ms),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn upstream_url(&self) -> Result<&str, ConfigError> {
        self.upstream_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingUpstreamUrl)
    }

    pub fn stream_enabled(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::FlightPlans => self.flightplans_enabled.unwrap_or(true),
            StreamKind::Market => self.market_enabled.unwrap_or(false),
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        let defaults = RetrySettings::default();
        RetrySettings {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            min_backoff: self.min_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.min_backoff),
            max_backoff: self.max_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.max_backoff),
        }
    }

    /// Lease time past the budget, never shorter than the retry backoff of
    /// one request, so a cycle started just above the safety margin can
    /// finish before the supervisor kills the generation.
    pub fn lease_grace(&self) -> Duration {
        let configured = Duration::from_secs(self.lease_grace_secs.unwrap_or(30));
        configured.max(self.retry_settings().worst_case_backoff())
    }

    /// Builds the validated engine settings of one stream.
    pub fn engine_settings(&self, kind: StreamKind) -> Result<EngineSettings, ConfigError> {
        let (partitions, poll_ms, budget_secs) = match kind {
            StreamKind::FlightPlans => (
                self.flightplan_systems.clone().unwrap_or_default(),
                self.flightplans_poll_ms.unwrap_or(500),
                self.flightplans_budget_secs.unwrap_or(15 * 60),
            ),
            StreamKind::Market => {
                let locations = self.market_locations.clone().unwrap_or_default();
                if locations.is_empty() {
                    return Err(ConfigError::MissingMarketLocations);
                }
                (
                    locations,
                    self.market_poll_ms.unwrap_or(3000),
                    self.market_budget_secs.unwrap_or(5 * 60),
                )
            }
        };

        let settings = EngineSettings {
            stream: kind.name().to_string(),
            partitions,
            poll_interval: Duration::from_millis(poll_ms),
            execution_budget: Duration::from_secs(budget_secs),
            safety_margin: Duration::from_millis(self.safety_margin_ms.unwrap_or(5000)),
            watchdog_interval: Duration::from_secs(self.watchdog_secs.unwrap_or(60)),
            lease_grace: self.lease_grace(),
        };
        settings.validate().map_err(|source| ConfigError::Settings {
            stream: kind.name().to_string(),
            source,
        })?;
        Ok(settings)
    }

    /// Settings of every enabled stream, failing on the first invalid one.
    pub fn enabled_streams(&self) -> Result<Vec<(StreamKind, EngineSettings)>, ConfigError> {
        self.upstream_url()?;
        let streams = StreamKind::ALL
            .into_iter()
            .filter(|kind| self.stream_enabled(*kind))
            .map(|kind| self.engine_settings(kind).map(|settings| (kind, settings)))
            .collect::<Result<Vec<_>, _>>()?;
        if streams.is_empty() {
            return Err(ConfigError::NoStreamEnabled);
        }
        Ok(streams)
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Defaults, then the JSON file, then environment variables and CLI arguments.
pub fn resolve_config(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli)
}

pub fn load_config() -> Config {
    resolve_config(Config::parse())
}
