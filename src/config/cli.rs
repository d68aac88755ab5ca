use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the marquee binary.
#[derive(Debug, Parser)]
#[command(name = "marquee", version, about = "Movie catalogue backend")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MARQUEE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP and WebSocket service.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    Migrate(MigrateArgs),
    /// Delete cache entries by exact key or by keyword.
    #[command(name = "purge-cache")]
    PurgeCache(PurgeCacheArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheBackendOverride {
    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeCacheArgs {
    #[command(flatten)]
    pub cache: CacheBackendOverride,

    /// Exact key to delete. Repeatable.
    #[arg(long = "key", value_name = "KEY")]
    pub keys: Vec<String>,

    /// Delete every key containing this keyword.
    #[arg(long = "keyword", value_name = "KEYWORD")]
    pub keyword: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheBackendOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the per-query timeout in milliseconds.
    #[arg(long = "database-query-timeout-ms", value_name = "MS")]
    pub database_query_timeout_ms: Option<u64>,

    /// Override the in-process cache capacity.
    #[arg(long = "cache-memory-capacity", value_name = "ENTRIES")]
    pub cache_memory_capacity: Option<usize>,

    /// Override the number of movies per page.
    #[arg(long = "cache-movie-page-size", value_name = "COUNT")]
    pub cache_movie_page_size: Option<u32>,

    /// Override the outbound queue capacity per listener.
    #[arg(long = "hub-listener-queue", value_name = "MESSAGES")]
    pub hub_listener_queue: Option<usize>,

    /// Override the hub command channel capacity.
    #[arg(long = "hub-command-buffer", value_name = "COMMANDS")]
    pub hub_command_buffer: Option<usize>,
}
