//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheBackendOverride, CliArgs, Command, DatabaseOverride, MigrateArgs, PurgeCacheArgs,
    ServeArgs, ServeOverrides,
};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::BackendKind;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "marquee";
const ENV_PREFIX: &str = "MARQUEE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_QUERY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_LIST_TTL_SECS: u64 = 30 * 60;
const DEFAULT_ENTITY_TTL_SECS: u64 = 30 * 60;
const DEFAULT_DETAIL_TTL_SECS: u64 = 10 * 60;
const DEFAULT_PAGE_TTL_SECS: u64 = 30 * 60;
const DEFAULT_MOVIE_PAGE_SIZE: u32 = 24;
const DEFAULT_HUB_LISTENER_QUEUE: usize = 64;
const DEFAULT_HUB_COMMAND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub hub: HubSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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
    /// Absent means the in-process document store.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub redis_url: Option<String>,
    pub memory_capacity: NonZeroUsize,
    pub list_ttl: Duration,
    pub entity_ttl: Duration,
    pub detail_ttl: Duration,
    pub page_ttl: Duration,
    pub movie_page_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub listener_queue: NonZeroUsize,
    pub command_buffer: NonZeroUsize,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::PurgeCache(args)) => raw.apply_cache_backend_override(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    hub: RawHubSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(timeout) = overrides.database_query_timeout_ms {
            self.database.query_timeout_ms = Some(timeout);
        }
        if let Some(capacity) = overrides.cache_memory_capacity {
            self.cache.memory_capacity = Some(capacity);
        }
        if let Some(size) = overrides.cache_movie_page_size {
            self.cache.movie_page_size = Some(size);
        }
        if let Some(queue) = overrides.hub_listener_queue {
            self.hub.listener_queue = Some(queue);
        }
        if let Some(buffer) = overrides.hub_command_buffer {
            self.hub.command_buffer = Some(buffer);
        }

        self.apply_database_override(&overrides.database);
        self.apply_cache_backend_override(&overrides.cache);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_backend_override(&mut self, overrides: &CacheBackendOverride) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            hub,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            hub: build_hub_settings(hub)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
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
    let url = non_blank(database.url);

    let max_connections = NonZeroU32::new(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
    )
    .ok_or_else(|| LoadError::invalid("database.max_connections", "must be greater than zero"))?;

    let timeout_ms = database
        .query_timeout_ms
        .unwrap_or(DEFAULT_DB_QUERY_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "database.query_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        url,
        max_connections,
        query_timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") | Some("memory") => BackendKind::Memory,
        Some("redis") => BackendKind::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`; expected memory or redis"),
            ));
        }
    };

    let redis_url = non_blank(cache.redis_url);
    if backend == BackendKind::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is redis",
        ));
    }

    let memory_capacity = non_zero_usize(
        cache.memory_capacity.unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY),
        "cache.memory_capacity",
    )?;
    let movie_page_size = NonZeroU32::new(cache.movie_page_size.unwrap_or(DEFAULT_MOVIE_PAGE_SIZE))
        .ok_or_else(|| LoadError::invalid("cache.movie_page_size", "must be greater than zero"))?;

    Ok(CacheSettings {
        backend,
        redis_url,
        memory_capacity,
        list_ttl: ttl(cache.list_ttl_secs, DEFAULT_LIST_TTL_SECS, "cache.list_ttl_secs")?,
        entity_ttl: ttl(
            cache.entity_ttl_secs,
            DEFAULT_ENTITY_TTL_SECS,
            "cache.entity_ttl_secs",
        )?,
        detail_ttl: ttl(
            cache.detail_ttl_secs,
            DEFAULT_DETAIL_TTL_SECS,
            "cache.detail_ttl_secs",
        )?,
        page_ttl: ttl(cache.page_ttl_secs, DEFAULT_PAGE_TTL_SECS, "cache.page_ttl_secs")?,
        movie_page_size,
    })
}

fn build_hub_settings(hub: RawHubSettings) -> Result<HubSettings, LoadError> {
    Ok(HubSettings {
        listener_queue: non_zero_usize(
            hub.listener_queue.unwrap_or(DEFAULT_HUB_LISTENER_QUEUE),
            "hub.listener_queue",
        )?,
        command_buffer: non_zero_usize(
            hub.command_buffer.unwrap_or(DEFAULT_HUB_COMMAND_BUFFER),
            "hub.command_buffer",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
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
    query_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    memory_capacity: Option<usize>,
    list_ttl_secs: Option<u64>,
    entity_ttl_secs: Option<u64>,
    detail_ttl_secs: Option<u64>,
    page_ttl_secs: Option<u64>,
    movie_page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHubSettings {
    listener_queue: Option<usize>,
    command_buffer: Option<usize>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn ttl(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "ttl must be greater than zero")),
        secs => Ok(Duration::from_secs(secs)),
    }
}
