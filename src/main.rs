use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use onelink::analytics::{
    AnalyticsService, ClickIngestor, GeoEnricher, GeoLookup, IpApiClient, MaxMindLookup,
};
use onelink::api::{self, AppState};
use onelink::auth::{Authenticator, TokenService};
use onelink::config::{Config, DatabaseBackend, GeoProvider};
use onelink::links::{LinkService, PathAllocator};
use onelink::redirect::{self, RedirectState};
use onelink::storage::{PostgresStorage, SqliteStorage, Storage};
use onelink::users::UserService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    // Initialize database
    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let tokens = TokenService::from_config(&config.auth);
    let users = Arc::new(
        UserService::new(Arc::clone(&storage), tokens.clone())
            .with_chat_link_ttl(Duration::from_secs(config.auth.chat_link_ttl_secs)),
    );
    let anonymous = users.ensure_anonymous().await?;
    info!("👤 Anonymous user ready (id {})", anonymous.id);

    let links = Arc::new(LinkService::new(
        Arc::clone(&storage),
        PathAllocator::new(config.links.short_path_length),
    ));
    let analytics = Arc::new(AnalyticsService::new(Arc::clone(&storage)));

    // Click ingestion and enrichment
    let (ingestor, ingest_handle) =
        ClickIngestor::spawn(Arc::clone(&storage), config.ingest.buffer_size);
    info!(
        "📥 Click ingestion started (buffer {})",
        config.ingest.buffer_size
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let enrich_handle = if config.enrich.enabled {
        let lookup: Arc<dyn GeoLookup> = match config.enrich.provider {
            GeoProvider::IpApi => Arc::new(IpApiClient::new(
                config.enrich.api_url.clone(),
                Duration::from_secs(config.enrich.api_timeout_secs),
            )?),
            GeoProvider::Maxmind => Arc::new(MaxMindLookup::new(
                config.enrich.geoip_city_db_path.as_deref(),
                config.enrich.geoip_asn_db_path.as_deref(),
            )?),
        };
        info!(
            "🌍 Geo enrichment enabled via {} (every {}s, batch {})",
            lookup.name(),
            config.enrich.interval_secs,
            config.enrich.batch_size
        );
        let enricher = Arc::new(GeoEnricher::new(Arc::clone(&storage), lookup, &config.enrich));
        Some(enricher.spawn(shutdown_rx))
    } else {
        info!("🌍 Geo enrichment is disabled");
        None
    };

    // Create routers
    let authenticator = Arc::new(Authenticator::new(tokens.clone(), Arc::clone(&storage)));
    let api_state = Arc::new(AppState {
        links: Arc::clone(&links),
        users,
        analytics,
        tokens,
    });
    let api_router = api::create_api_router(
        api_state,
        authenticator,
        Duration::from_secs(config.request_timeout_secs),
    );

    let redirect_state = Arc::new(RedirectState {
        links,
        ingestor: ingestor.clone(),
        ingest_config: config.ingest.clone(),
    });
    let redirect_router = redirect::create_redirect_router(redirect_state);

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    info!("🚀 API server listening on http://{}", api_addr);
    info!("   - API endpoints available at http://{}/api/...", api_addr);

    // Start redirect server
    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("failed to bind redirect listener on {redirect_addr}"))?;
    info!("🚀 Redirect server listening on http://{}", redirect_addr);

    // Run both servers concurrently until Ctrl-C
    let mut api_shutdown = shutdown_tx.subscribe();
    let mut redirect_shutdown = shutdown_tx.subscribe();
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    tokio::try_join!(
        axum::serve(api_listener, api_router).with_graceful_shutdown(async move {
            let _ = api_shutdown.wait_for(|stop| *stop).await;
        }),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = redirect_shutdown.wait_for(|stop| *stop).await;
        }),
    )?;

    if let Some(handle) = enrich_handle {
        let _ = handle.await;
    }

    info!("Flushing pending clicks...");
    ingestor.flush().await;
    drop(ingestor);
    if tokio::time::timeout(Duration::from_secs(10), ingest_handle)
        .await
        .is_err()
    {
        warn!("Click writer did not stop in time");
    }
    info!("👋 Shutdown complete");

    Ok(())
}

/// Flip `shutdown` once `signal` fires. If the signal cannot be listened
/// for, hold the sender forever; dropping it would stop every subscriber.
async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Failed to listen for Ctrl-C, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
    let _ = shutdown.send(true);
}
