use cardpool::store::PersistenceBackend;
use cardpool::sync::FlushOutcome;
use cardpool::{api, config::Config, db::init_db, CardEngine, SqliteStore, StoreArchive};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("Server error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = init_db(&config.database_path).await?;

    let backend: Arc<dyn PersistenceBackend> = Arc::new(SqliteStore::new(pool));
    let archive = Arc::new(StoreArchive::new(
        Arc::clone(&backend),
        config.engine.max_history,
    ));
    let engine = CardEngine::new(config.engine.clone(), backend, archive);

    let report = engine.load().await;
    if let Some(failed) = &report.failed {
        tracing::warn!(error = %failed, "starting with an empty pool");
    }

    let app = api::create_router(api::AppState::new(Arc::clone(&engine), config.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match engine.flush().await {
        FlushOutcome::Drained => tracing::info!("pending card writes flushed"),
        FlushOutcome::TimedOut => {
            tracing::warn!(stats = ?engine.writer_stats(), "shutting down with writes pending")
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
