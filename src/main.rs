use std::{process, sync::Arc};

use marquee::{
    application::{error::AppError, repos::DocumentStore, resources::ResourceService},
    cache::{BackendKind, CacheAside, CacheBackend, CacheConfig, CacheKey, MemoryBackend, RedisBackend},
    config,
    infra::{
        db::{MemoryDocuments, PostgresDocuments},
        error::InfraError,
        http::{AppState, build_router},
        telemetry,
    },
    notify::{Hub, HubConfig, Notifier},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "marquee::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::PurgeCache(args) => run_purge_cache(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let cache = init_cache(&settings).await?;
    let hub = Hub::spawn(HubConfig::from(&settings.hub));

    let resources = ResourceService::new(store, cache, Notifier::new(hub.clone()))
        .with_query_timeout(settings.database.query_timeout)
        .with_movie_page_size(settings.cache.movie_page_size.get());

    let router = build_router(AppState { resources, hub });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target_module = SOURCE,
        addr = %settings.server.addr,
        cache_backend = settings.cache.backend.as_str(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target_module = SOURCE, "Server stopped");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresDocuments::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    PostgresDocuments::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    info!(target_module = SOURCE, "Migrations applied");
    Ok(())
}

async fn run_purge_cache(
    settings: config::Settings,
    args: config::PurgeCacheArgs,
) -> Result<(), AppError> {
    if args.keys.is_empty() && args.keyword.is_none() {
        return Err(AppError::unexpected(
            "purge-cache needs at least one --key or a --keyword",
        ));
    }

    if !settings.cache.backend.is_shared() {
        return Err(InfraError::configuration(
            "purge-cache needs cache.backend = \"redis\"; the memory cache lives inside the serving process",
        )
        .into());
    }

    let cache = init_cache(&settings).await?;

    if !args.keys.is_empty() {
        let keys: Vec<CacheKey> = args.keys.iter().map(CacheKey::raw).collect();
        cache.invalidate_many(&keys).await;
        info!(target_module = SOURCE, count = keys.len(), "Cache keys purged");
    }

    if let Some(keyword) = args.keyword.as_deref() {
        let removed = cache.invalidate_by_keyword(keyword).await;
        info!(target_module = SOURCE, keyword, removed, "Cache keyword purged");
    }

    Ok(())
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn DocumentStore>, AppError> {
    let Some(url) = settings.database.url.as_deref() else {
        warn!(
            target_module = SOURCE,
            "No database url configured; documents are kept in memory and lost on exit"
        );
        return Ok(Arc::new(MemoryDocuments::new()));
    };

    let pool = PostgresDocuments::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    PostgresDocuments::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresDocuments::new(pool)))
}

async fn init_cache(settings: &config::Settings) -> Result<CacheAside, AppError> {
    let config = CacheConfig::from(&settings.cache);
    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new(&config)),
        BackendKind::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| InfraError::configuration("cache.redis_url is not configured"))?;
            Arc::new(
                RedisBackend::connect(url)
                    .await
                    .map_err(|err| AppError::from(InfraError::from(err)))?,
            )
        }
    };

    Ok(CacheAside::new(backend, config))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target_module = SOURCE, error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target_module = SOURCE, "Shutdown signal received");
}
