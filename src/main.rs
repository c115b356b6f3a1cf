use std::sync::Arc;
use std::time::Duration;

use propcopy::adapters::{AdapterRegistry, AdapterSettings};
use propcopy::api::router::create_router;
use propcopy::config::AppConfig;
use propcopy::engine::{CopierEngine, EngineSettings};
use propcopy::{db, metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls CryptoProvider");

    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    // --- Prometheus metrics ---
    let metrics_handle = metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized");

    tracing::info!("Connecting to database...");
    let db = db::init_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    // Run pending migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    // --- Adapter registry ---
    let registry = Arc::new(AdapterRegistry::new(AdapterSettings::from_config(&config)));
    if config.use_real_adapters {
        tracing::info!("Adapter registry in REAL mode");
    } else {
        tracing::warn!("Adapter registry in MOCK mode (USE_REAL_ADAPTERS=false)");
    }

    // --- Copier engine ---
    let engine_settings = EngineSettings {
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
        ..Default::default()
    };
    let engine = Arc::new(CopierEngine::new(
        db.clone(),
        Arc::clone(&registry),
        engine_settings,
    ));

    // Re-subscribe copiers persisted as ACTIVE before taking traffic;
    // mapping uniqueness keeps any replayed window idempotent.
    engine.recover().await?;

    let state = AppState {
        db,
        config,
        registry,
        engine: Arc::clone(&engine),
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    // --- Graceful shutdown ---
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully...");
    engine.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown...");
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
