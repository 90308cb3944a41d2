use std::sync::Arc;

use clap::Parser;
use skannr::cache::DedupCache;
use skannr::config::{Cli, Config, default_config_path};
use skannr::handler::AppState;
use skannr::lookup::UpcItemDb;
use skannr::sheets::{GoogleSheets, SheetStore};
use skannr::{routes, unpack_error};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("skannr.svc starting");

    let config_path = args
        .config_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(default_config_path);

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });

    let sheet: Arc<dyn SheetStore> = Arc::new(GoogleSheets::new(&cfg.sheets).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&e), "failed to setup sheets client");
        std::process::exit(1);
    }));
    let lookup = Arc::new(UpcItemDb::new(&cfg.lookup).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&e), "failed to setup lookup client");
        std::process::exit(1);
    }));

    let cache = DedupCache::load(sheet.as_ref(), cfg.sheets.header_rows)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %unpack_error(&e), "failed to read existing barcodes");
            std::process::exit(1);
        });
    tracing::info!(barcodes = cache.len(), "dedup cache seeded");

    let app = routes(AppState {
        cache: Arc::new(cache),
        lookup,
        sheet,
        image_cells: cfg.sheets.image_cells,
    });

    let address = cfg.app.address();
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    let cancellation_token = CancellationToken::new();
    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "unable to listen for ctrl+c");
            return;
        }
        tracing::info!("ctrl+c signal received, preparing to shutdown");
        shutdown_token.cancel();
    });

    tracing::info!("skannr.svc running on {}", &address);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await;
    if let Err(err) = result {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }

    tracing::info!("skannr.svc going off, graceful shutdown complete");
}
