use murmur_server::{api, AppState, ServerConfig};
use murmur_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!("Starting murmur server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the record store and build shared state
    // -----------------------------------------------------------------------
    let path = config.database_path.clone();
    let db = tokio::task::spawn_blocking(move || Database::open_at(&path)).await??;

    let http_addr = config.http_addr;
    let state = AppState::new(config, db).await?;

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server until Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
