//! ferry API server

use clap::Parser;
use ferry_api::services::GitHubHosts;
use ferry_api::{AppState, ServerConfig, routes};
use ferry_db::{Repos, create_pool, run_migrations};
use ferry_scheduler::{Scheduler, StatusReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let repos = if config.in_memory {
        warn!("using the in-memory store; state is lost on exit");
        Repos::in_memory()
    } else {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required unless --in-memory is set"))?;

        info!("Connecting to database...");
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        info!("Database connected");
        Repos::postgres(pool)
    };

    let (reporter, worker) = StatusReporter::channel(config.status_buffer, &config.public_url);
    let status_worker = worker.spawn();

    let hosts = Arc::new(GitHubHosts::new(
        config.github_api.clone(),
        Duration::from_secs(config.github_timeout),
    )?);
    let scheduler = Scheduler::new(repos, hosts, reporter);
    let state = AppState::new(scheduler);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(addr = %config.listen, "Starting server");
    let listener = TcpListener::bind(config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    // the router held the last reporter; let queued statuses go out
    status_worker.await?;
    Ok(())
}
