//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::fanout::{
    DEFAULT_FANOUT_QUEUE_CAPACITY, DEFAULT_FANOUT_WORKERS, FanoutConfig,
};
use crate::application::timeline::{
    CacheMaintenance, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_REFILL_GUARD,
    DEFAULT_CACHE_REFILL_TIMEOUT, DEFAULT_QUERY_LIMIT, PublishPolicy, TimelineConfig,
};

pub use cli::{
    CliArgs, Command, DatabaseOverride, LoggingOverrides, MigrateArgs, PostArgs,
    RuntimeOverrides, TimelineArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "murmur";
const ENV_PREFIX: &str = "MURMUR";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_MAX_USERS: u64 = 10_000;
const DEFAULT_PUBLISH_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_PUBLISH_BACKOFF_MS: u64 = 200;
const DEFAULT_SOCIAL_GRAPH_URL: &str = "http://127.0.0.1:8081";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BROADCAST_CAPACITY: u64 = 1_024;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub fanout: FanoutSettings,
    pub timeline: TimelineSettings,
    pub cache: CacheSettings,
    pub social_graph: SocialGraphSettings,
    pub events: EventsSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub workers: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct TimelineSettings {
    pub query_limit: NonZeroUsize,
    pub cache_refill_timeout: Duration,
    pub cache_refill_guard: Duration,
    pub cache_maintenance: CacheMaintenance,
    pub publish_policy: PublishPolicy,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_users: NonZeroUsize,
    pub max_entries: NonZeroUsize,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SocialGraphSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EventsSettings {
    /// When unset, events go to an in-process broadcast channel.
    pub webhook_url: Option<Url>,
    pub timeout: Duration,
    pub broadcast_capacity: NonZeroUsize,
}

impl Settings {
    /// Engine tuning assembled from the fan-out, timeline and cache sections.
    pub fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig {
            query_limit: self.timeline.query_limit.get(),
            cache_max_entries: self.cache.max_entries.get(),
            cache_refill_timeout: self.timeline.cache_refill_timeout,
            cache_refill_guard: self.timeline.cache_refill_guard,
            cache_maintenance: self.timeline.cache_maintenance,
            publish_policy: self.timeline.publish_policy,
            fanout: FanoutConfig {
                workers: self.fanout.workers,
                queue_capacity: self.fanout.queue_capacity,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Migrate(args) => {
            raw.apply_database_override(&args.database);
            raw.apply_logging_overrides(&args.logging);
        }
        Command::Post(args) => raw.apply_runtime_overrides(&args.overrides),
        Command::Timeline(args) => raw.apply_runtime_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    fanout: RawFanoutSettings,
    timeline: RawTimelineSettings,
    cache: RawCacheSettings,
    social_graph: RawSocialGraphSettings,
    events: RawEventsSettings,
}

impl RawSettings {
    fn apply_runtime_overrides(&mut self, overrides: &RuntimeOverrides) {
        self.apply_database_override(&overrides.database);
        self.apply_logging_overrides(&overrides.logging);
        if let Some(url) = overrides.social_graph_url.as_ref() {
            self.social_graph.base_url = Some(url.clone());
        }
        if let Some(url) = overrides.events_webhook_url.as_ref() {
            self.events.webhook_url = Some(url.clone());
        }
        if let Some(workers) = overrides.fanout_workers {
            self.fanout.workers = Some(workers);
        }
        if let Some(limit) = overrides.timeline_query_limit {
            self.timeline.query_limit = Some(limit);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            fanout,
            timeline,
            cache,
            social_graph,
            events,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            fanout: build_fanout_settings(fanout)?,
            timeline: build_timeline_settings(timeline)?,
            cache: build_cache_settings(cache)?,
            social_graph: build_social_graph_settings(social_graph)?,
            events: build_events_settings(events)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_connections.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_fanout_settings(fanout: RawFanoutSettings) -> Result<FanoutSettings, LoadError> {
    let workers = fanout.workers.unwrap_or(DEFAULT_FANOUT_WORKERS as u64);
    let queue_capacity = fanout
        .queue_capacity
        .unwrap_or(DEFAULT_FANOUT_QUEUE_CAPACITY as u64);

    Ok(FanoutSettings {
        workers: non_zero_usize(workers, "fanout.workers")?,
        queue_capacity: non_zero_usize(queue_capacity, "fanout.queue_capacity")?,
    })
}

fn build_timeline_settings(timeline: RawTimelineSettings) -> Result<TimelineSettings, LoadError> {
    let query_limit = timeline.query_limit.unwrap_or(DEFAULT_QUERY_LIMIT as u64);
    let query_limit = non_zero_usize(query_limit, "timeline.query_limit")?;

    let cache_refill_timeout = match timeline.cache_refill_timeout_ms {
        Some(0) => {
            return Err(LoadError::invalid(
                "timeline.cache_refill_timeout_ms",
                "must be greater than zero",
            ));
        }
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_CACHE_REFILL_TIMEOUT,
    };
    let cache_refill_guard = timeline
        .cache_refill_guard_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_CACHE_REFILL_GUARD);
    if cache_refill_guard > cache_refill_timeout {
        return Err(LoadError::invalid(
            "timeline.cache_refill_guard_ms",
            "must not exceed timeline.cache_refill_timeout_ms",
        ));
    }

    let cache_maintenance = match timeline.cache_maintenance.as_deref().map(str::trim) {
        None | Some("invalidate") => CacheMaintenance::InvalidateAfterFanout,
        Some("push") => CacheMaintenance::PushAndTrim,
        Some(other) => {
            return Err(LoadError::invalid(
                "timeline.cache_maintenance",
                format!("expected `invalidate` or `push`, got `{other}`"),
            ));
        }
    };

    let publish_policy = match timeline.publish_policy.as_deref().map(str::trim) {
        None | Some("strict") => PublishPolicy::Strict,
        Some("best_effort") => {
            let attempts = timeline
                .publish_max_attempts
                .unwrap_or(DEFAULT_PUBLISH_MAX_ATTEMPTS);
            PublishPolicy::BestEffort {
                max_attempts: non_zero_u32(attempts.into(), "timeline.publish_max_attempts")?,
                backoff: Duration::from_millis(
                    timeline
                        .publish_backoff_ms
                        .unwrap_or(DEFAULT_PUBLISH_BACKOFF_MS),
                ),
            }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "timeline.publish_policy",
                format!("expected `strict` or `best_effort`, got `{other}`"),
            ));
        }
    };

    Ok(TimelineSettings {
        query_limit,
        cache_refill_timeout,
        cache_refill_guard,
        cache_maintenance,
        publish_policy,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_users = cache.max_users.unwrap_or(DEFAULT_CACHE_MAX_USERS);
    let max_entries = cache
        .max_entries
        .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES as u64);
    let ttl = match cache.ttl_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.ttl_seconds",
                "must be greater than zero; omit it to disable expiry",
            ));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    Ok(CacheSettings {
        max_users: non_zero_usize(max_users, "cache.max_users")?,
        max_entries: non_zero_usize(max_entries, "cache.max_entries")?,
        ttl,
    })
}

fn build_social_graph_settings(
    graph: RawSocialGraphSettings,
) -> Result<SocialGraphSettings, LoadError> {
    let raw_url = graph
        .base_url
        .unwrap_or_else(|| DEFAULT_SOCIAL_GRAPH_URL.to_string());
    let base_url = parse_url(&raw_url, "social_graph.base_url")?;
    let timeout = positive_millis(
        graph.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
        "social_graph.timeout_ms",
    )?;

    Ok(SocialGraphSettings { base_url, timeout })
}

fn build_events_settings(events: RawEventsSettings) -> Result<EventsSettings, LoadError> {
    let webhook_url = events
        .webhook_url
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_url(&value, "events.webhook_url"))
        .transpose()?;
    let timeout = positive_millis(
        events.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
        "events.timeout_ms",
    )?;
    let broadcast_capacity = non_zero_usize(
        events
            .broadcast_capacity
            .unwrap_or(DEFAULT_BROADCAST_CAPACITY),
        "events.broadcast_capacity",
    )?;

    Ok(EventsSettings {
        webhook_url,
        timeout,
        broadcast_capacity,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFanoutSettings {
    workers: Option<u64>,
    queue_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTimelineSettings {
    query_limit: Option<u64>,
    cache_refill_timeout_ms: Option<u64>,
    cache_refill_guard_ms: Option<u64>,
    cache_maintenance: Option<String>,
    publish_policy: Option<String>,
    publish_max_attempts: Option<u32>,
    publish_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_users: Option<u64>,
    max_entries: Option<u64>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSocialGraphSettings {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventsSettings {
    webhook_url: Option<String>,
    timeout_ms: Option<u64>,
    broadcast_capacity: Option<u64>,
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
