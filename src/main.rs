use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mailgate::config::Config;
use mailgate::crypto::SecretCipher;
use mailgate::db;
use mailgate::routes::{self, AppState};
use mailgate::services::delivery_service::{self, MailTransport};
use mailgate::services::prune_service;
use mailgate::smtp::SmtpMailer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mailgate=debug")),
        )
        .init();

    let config = Config::from_env()?;
    let cipher = Arc::new(SecretCipher::from_hex_key(&config.encryption_key)?);

    let db_url = db::normalize_sqlite_url(&config.database_url);
    // Ensure the file exists for file-based sqlite (avoids an open error on
    // some setups).
    if let Some(path) = db::db_file_path(&db_url) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        if !path.exists() {
            std::fs::File::create(&path).ok();
        }
    }
    let pool = sqlx::SqlitePool::connect(&db_url).await?;
    db::run_migrations(&pool).await?;

    let mailer: Arc<dyn MailTransport> =
        Arc::new(SmtpMailer::new(Duration::from_secs(config.smtp_timeout_secs)));
    tokio::spawn(delivery_service::start_delivery_loop(
        pool.clone(),
        mailer,
        cipher,
        Duration::from_secs(config.worker_interval_secs),
        config.worker_batch_size,
    ));
    tokio::spawn(prune_service::start_prune_loop(pool.clone()));

    let app = routes::router(AppState { pool });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
