use evalcore::analysis::HttpAnalysisClient;
use evalcore::config::Config;
use evalcore::db::{self, MemoryStore, PgSubmissionStore, SubmissionStore};
use evalcore::evaluation::Evaluator;
use evalcore::routes;
use evalcore::state::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evalcore=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn SubmissionStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;
            db::run_migrations(pool.as_ref()).await?;
            Arc::new(PgSubmissionStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let analysis = Arc::new(HttpAnalysisClient::new(
        config.analysis_api_url.clone(),
        config.analysis_timeout,
    )?);
    let evaluator = Evaluator::new(store.clone(), analysis.clone(), config.evaluator_settings());
    let state = Arc::new(AppState::new(store.clone(), analysis, evaluator));

    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(
        analysis_api_url = %config.analysis_api_url,
        timeout_secs = config.analysis_timeout.as_secs(),
        "Evaluation service listening on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    tracing::info!("Store closed, shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
