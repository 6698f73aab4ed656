use anyhow::Context;
use liquidator::orchestration::LogNotifier;
use liquidator::{api, config::Config, db::init_db, MemoryStore, Repository, TokioDispatcher};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let dispatcher = Arc::new(TokioDispatcher::new(
        config.max_workers,
        config.worker_timeout,
    ));
    let kv = Arc::new(MemoryStore::new());

    // No upstream feed is wired in this binary; ingestion answers 503.
    let state = api::AppState::new(
        repo,
        None,
        kv,
        dispatcher.clone(),
        Arc::new(LogNotifier),
        &config,
    );
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    dispatcher.shutdown();
    Ok(())
}
