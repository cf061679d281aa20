//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fetch loop behavior
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Retry and backoff policy for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Media download settings
    #[serde(default)]
    pub media: MediaConfig,

    /// Messaging provider (web preview) settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Data lake layout, relative to the project root
    #[serde(default)]
    pub paths: PathsConfig,

    /// Postgres loader settings
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Channels always scraped, before any listed in the channels file
    #[serde(default = "defaults::channels")]
    pub channels: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are logged and ignored so a typo in one variable
    /// never discards the rest of the configuration.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "SCRAPER_MAX_MESSAGES", &mut self.fetcher.max_messages);
        override_parsed(&lookup, "SCRAPER_LOOKBACK_DAYS", &mut self.fetcher.lookback_days);
        override_parsed(
            &lookup,
            "SCRAPER_CHANNEL_TIMEOUT_SECS",
            &mut self.fetcher.channel_timeout_secs,
        );
        override_parsed(&lookup, "SCRAPER_MAX_MEDIA", &mut self.media.max_per_channel);
        override_parsed(&lookup, "SCRAPER_RETRY_ATTEMPTS", &mut self.retry.attempts);
        override_parsed(
            &lookup,
            "SCRAPER_RETRY_BASE_DELAY_MS",
            &mut self.retry.base_delay_ms,
        );
        override_parsed(
            &lookup,
            "SCRAPER_FLOOD_WAIT_CAP_SECS",
            &mut self.retry.flood_wait_cap_secs,
        );

        if let Some(raw) = lookup("SCRAPER_DOWNLOAD_MEDIA") {
            match parse_flag(&raw) {
                Some(flag) => self.media.download = flag,
                None => log::warn!("Ignoring SCRAPER_DOWNLOAD_MEDIA={raw:?}: not a boolean"),
            }
        }

        let wh = &mut self.warehouse;
        if let Some(url) = lookup("DATABASE_URL") {
            wh.database_url = Some(url);
        }
        if let Some(host) = lookup("PGHOST") {
            wh.host = host;
        }
        override_parsed(&lookup, "PGPORT", &mut wh.port);
        if let Some(db) = lookup("PGDATABASE") {
            wh.database = db;
        }
        if let Some(user) = lookup("PGUSER") {
            wh.user = user;
        }
        if let Some(password) = lookup("PGPASSWORD") {
            wh.password = Some(password);
        }
        if let Some(dir) = lookup("DATA_LAKE_DIR") {
            wh.data_lake_dir = Some(dir);
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.channel_timeout_secs == 0 {
            return Err(AppError::validation(
                "fetcher.channel_timeout_secs must be > 0",
            ));
        }
        if self.fetcher.page_size == 0 {
            return Err(AppError::validation("fetcher.page_size must be > 0"));
        }
        if self.retry.attempts == 0 {
            return Err(AppError::validation("retry.attempts must be >= 1"));
        }
        if self.provider.user_agent.trim().is_empty() {
            return Err(AppError::validation("provider.user_agent is empty"));
        }
        if self.provider.timeout_secs == 0 {
            return Err(AppError::validation("provider.timeout_secs must be > 0"));
        }
        url::Url::parse(&self.provider.base_url).map_err(|e| {
            AppError::validation(format!(
                "provider.base_url {:?} is not a URL: {e}",
                self.provider.base_url
            ))
        })?;
        if self.warehouse.batch_size == 0 {
            return Err(AppError::validation("warehouse.batch_size must be > 0"));
        }
        for (name, ident) in [
            ("warehouse.schema", &self.warehouse.schema),
            ("warehouse.table", &self.warehouse.table),
        ] {
            if !is_sql_identifier(ident) {
                return Err(AppError::validation(format!(
                    "{name} {ident:?} is not a plain SQL identifier"
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            retry: RetryConfig::default(),
            media: MediaConfig::default(),
            provider: ProviderConfig::default(),
            paths: PathsConfig::default(),
            warehouse: WarehouseConfig::default(),
            logging: LoggingConfig::default(),
            channels: defaults::channels(),
        }
    }
}

/// Fetch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Maximum messages taken per channel per run (0 = unlimited)
    #[serde(default = "defaults::max_messages")]
    pub max_messages: usize,

    /// Age limit for a channel's very first fetch, in days (0 = disabled)
    #[serde(default = "defaults::lookback_days")]
    pub lookback_days: u32,

    /// Wall-clock budget for one channel's fetch
    #[serde(default = "defaults::channel_timeout")]
    pub channel_timeout_secs: u64,

    /// Messages requested per provider page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Mirror every written partition into a flat CSV file
    #[serde(default = "defaults::enabled")]
    pub csv_mirror: bool,
}

impl FetcherConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_messages: defaults::max_messages(),
            lookback_days: defaults::lookback_days(),
            channel_timeout_secs: defaults::channel_timeout(),
            page_size: defaults::page_size(),
            csv_mirror: defaults::enabled(),
        }
    }
}

/// Retry/backoff policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts for a transient failure (first try included)
    #[serde(default = "defaults::retry_attempts")]
    pub attempts: u32,

    /// Delay before the second attempt; doubles on each further attempt
    #[serde(default = "defaults::retry_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on a single flood-wait sleep
    #[serde(default = "defaults::flood_wait_cap")]
    pub flood_wait_cap_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: defaults::retry_attempts(),
            base_delay_ms: defaults::retry_base_delay(),
            flood_wait_cap_secs: defaults::flood_wait_cap(),
        }
    }
}

/// Media download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Download photo attachments
    #[serde(default = "defaults::enabled")]
    pub download: bool,

    /// Fresh downloads allowed per channel per run (0 = unlimited)
    #[serde(default)]
    pub max_per_channel: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download: defaults::enabled(),
            max_per_channel: 0,
        }
    }
}

/// Web preview provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the public preview site
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Wait assumed for a 429 response without a Retry-After header
    #[serde(default = "defaults::default_flood_wait")]
    pub default_flood_wait_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            default_flood_wait_secs: defaults::default_flood_wait(),
        }
    }
}

/// Data lake paths, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "defaults::messages_dir")]
    pub messages_dir: String,

    #[serde(default = "defaults::images_dir")]
    pub images_dir: String,

    #[serde(default = "defaults::csv_dir")]
    pub csv_dir: String,

    /// Watermark store
    #[serde(default = "defaults::state_file")]
    pub state_file: String,

    /// Optional extra channels, one per line
    #[serde(default = "defaults::channels_file")]
    pub channels_file: String,

    #[serde(default = "defaults::log_file")]
    pub log_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            messages_dir: defaults::messages_dir(),
            images_dir: defaults::images_dir(),
            csv_dir: defaults::csv_dir(),
            state_file: defaults::state_file(),
            channels_file: defaults::channels_file(),
            log_file: defaults::log_file(),
        }
    }
}

/// Postgres loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Full connection URL; takes precedence over the individual parts
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "defaults::pg_host")]
    pub host: String,

    #[serde(default = "defaults::pg_port")]
    pub port: u16,

    #[serde(default = "defaults::pg_database")]
    pub database: String,

    #[serde(default = "defaults::pg_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "defaults::raw_schema")]
    pub schema: String,

    #[serde(default = "defaults::raw_table")]
    pub table: String,

    /// Rows per upsert statement
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Loader input; defaults to `paths.messages_dir` under the project root
    #[serde(default)]
    pub data_lake_dir: Option<String>,
}

impl WarehouseConfig {
    /// Resolve the connection URL.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }

        let mut url = url::Url::parse(&format!(
            "postgres://{}:{}/{}",
            self.host, self.port, self.database
        ))?;
        url.set_username(&self.user)
            .map_err(|_| AppError::config("warehouse.user cannot be set on the URL"))?;
        url.set_password(self.password.as_deref())
            .map_err(|_| AppError::config("warehouse.password cannot be set on the URL"))?;
        Ok(url.to_string())
    }

    /// Schema-qualified table name.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: defaults::pg_host(),
            port: defaults::pg_port(),
            database: defaults::pg_database(),
            user: defaults::pg_user(),
            password: None,
            schema: defaults::raw_schema(),
            table: defaults::raw_table(),
            batch_size: defaults::batch_size(),
            data_lake_dir: None,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Also write log lines to `paths.log_file`
    #[serde(default = "defaults::enabled")]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            file_enabled: defaults::enabled(),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring {key}={raw:?}: not a valid value"),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn is_sql_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

mod defaults {
    // Fetcher defaults
    pub fn max_messages() -> usize {
        0
    }
    pub fn lookback_days() -> u32 {
        30
    }
    pub fn channel_timeout() -> u64 {
        600
    }
    pub fn page_size() -> usize {
        100
    }
    pub fn enabled() -> bool {
        true
    }

    // Retry defaults
    pub fn retry_attempts() -> u32 {
        3
    }
    pub fn retry_base_delay() -> u64 {
        2_000
    }
    pub fn flood_wait_cap() -> u64 {
        60
    }

    // Provider defaults
    pub fn base_url() -> String {
        "https://t.me".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; fetcher/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn default_flood_wait() -> u64 {
        30
    }

    // Path defaults
    pub fn messages_dir() -> String {
        "data/raw/telegram_messages".into()
    }
    pub fn images_dir() -> String {
        "data/raw/images".into()
    }
    pub fn csv_dir() -> String {
        "data/raw/csv".into()
    }
    pub fn state_file() -> String {
        "data/raw/scrape_state.json".into()
    }
    pub fn channels_file() -> String {
        "channels.txt".into()
    }
    pub fn log_file() -> String {
        "logs/scraper.log".into()
    }

    // Warehouse defaults
    pub fn pg_host() -> String {
        "127.0.0.1".into()
    }
    pub fn pg_port() -> u16 {
        5432
    }
    pub fn pg_database() -> String {
        "medical_warehouse".into()
    }
    pub fn pg_user() -> String {
        "postgres".into()
    }
    pub fn raw_schema() -> String {
        "raw".into()
    }
    pub fn raw_table() -> String {
        "telegram_messages".into()
    }
    pub fn batch_size() -> usize {
        1_000
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn channels() -> Vec<String> {
        vec![
            "CheMed123".into(),
            "lobelia4cosmetics".into(),
            "tikvahpharma".into(),
            "rayapharmaceuticals".into(),
        ]
    }
}
