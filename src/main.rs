use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use friendtime::auth::jwt::JwtService;
use friendtime::config::{AppConfig, LogFormat};
use friendtime::db;
use friendtime::oauth::HttpIdentityProvider;
use friendtime::routes;
use friendtime::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.log_format);
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        environment = %config.app_env,
        limiter_enabled = config.limiter_enabled,
        google_oauth = config.google.is_some(),
        github_oauth = config.github.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let migration_pool = pool.clone();
    let applied = tokio::task::spawn_blocking(move || db::run_migrations(&migration_pool))
        .await
        .context("migration task panicked")??;
    tracing::info!(applied, "database migrations up to date");

    let jwt = JwtService::from_config(&config)?;
    let identity = Arc::new(HttpIdentityProvider::from_config(&config)?);
    let grace = Duration::from_secs(config.shutdown_grace_seconds);

    let state = AppState::new(pool, config, jwt, identity);
    let listen_addr: SocketAddr = {
        let config = state.config.clone();
        format!("{}:{}", config.server_host, config.server_port).parse()?
    };
    let app = routes::create_app(state.clone());

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "listening for HTTP");

    let stop = Arc::new(Notify::new());
    let stop_signal = stop.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop_signal.notified().await })
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            result.context("server task panicked")??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!(grace_seconds = grace.as_secs(), "shutting down, draining in-flight requests");
    stop.notify_one();

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.context("server task panicked")??,
        Err(_) => tracing::warn!("grace period elapsed with requests still in flight"),
    }

    drop(state);
    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "received shutdown signal"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "received shutdown signal"),
    }
}

fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}
