use std::net::SocketAddr;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

mod error;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path: PathBuf = std::env::var("ACFR_DB")
        .unwrap_or_else(|_| "acfr.db".to_string())
        .into();
    let addr: SocketAddr = std::env::var("ACFR_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let pool = acfr_storage::create_db(&db_path).await?;
    tracing::info!(db = %db_path.display(), "database ready");

    let app = routes::router(pool);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
