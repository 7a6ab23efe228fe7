use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_server::{app::app, auth::AuthServer, config::ServerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let http_timeout = config.http_timeout();
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    let admins: Vec<String> = config.admins().into_iter().map(str::to_string).collect();

    let server = AuthServer::builder()
        .oauth2(config.oauth2)
        .session(config.session)
        .http_timeout(http_timeout)
        .build()
        .expect("failed to set up authentication");
    server.set_admins(admins);
    let server = Arc::new(server);

    // Spawn periodic session cleanup task
    let cleanup_server = Arc::clone(&server);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs.max(1)));
        loop {
            interval.tick().await;
            let count = cleanup_server.cleanup_expired_sessions();
            if count > 0 {
                tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app(server).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
