//! Centrix Reports Server — test report ingestion.
//!
//! Two listeners: uploads are POSTed to the upload port and stored under the
//! reports directory, which the download port serves back as plain files.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use reports_server::config::IngestConfig;
use reports_server::metrics;
use reports_server::routes::{self, ReportsRouterState};
use reports_server::services::artifact_store::FsArtifactStore;
use reports_server::services::index_sink::HttpIndexSink;
use reports_server::services::ingest_service::ReportIngestor;
use reports_server::services::location::StaticLocationResolver;
use reports_server::services::memory_store::MemoryMetadataStore;
use reports_server::services::metadata_store::MetadataStore;
use reports_server::services::pg_store::PgMetadataStore;

#[derive(Parser)]
#[command(name = "centrix-reports", about = "Centrix Test Report Server")]
struct Cli {
    /// Address both listeners bind to
    #[arg(long, env = "REPORTS_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Upload listener port
    #[arg(long, env = "REPORTS_UPLOAD_PORT", default_value = "8081")]
    upload_port: u16,

    /// Download listener port
    #[arg(long, env = "REPORTS_DOWNLOAD_PORT", default_value = "8080")]
    download_port: u16,

    /// Directory artifacts are stored in and served from
    #[arg(long, env = "REPORTS_DIR", default_value = "/reports")]
    reports_dir: PathBuf,

    /// PostgreSQL connection URL for report metadata
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    tracing::info!("Starting Centrix Reports Server...");

    tokio::fs::create_dir_all(&cli.reports_dir).await?;

    // Metadata store
    let metadata: Arc<dyn MetadataStore> = match &cli.database_url {
        Some(url) => Arc::new(PgMetadataStore::connect(url, config.db_max_connections).await?),
        None => {
            tracing::warn!(
                "DATABASE_URL not set -- report metadata is kept in memory only; \
                 no build activities can be registered, so uploads will answer \
                 ACTIVITY_NOT_FOUND after storing and indexing the report"
            );
            Arc::new(MemoryMetadataStore::new())
        }
    };

    let public_base_url = config
        .public_base_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", cli.download_port));

    let ingestor = ReportIngestor::new(
        Arc::new(FsArtifactStore::new(&cli.reports_dir)),
        Arc::new(HttpIndexSink::new(&config.index_url, config.index_timeout)?),
        metadata,
        Arc::new(StaticLocationResolver::new(public_base_url)),
        config,
    );

    let upload_app = routes::upload_router(ReportsRouterState::new(Arc::new(ingestor)));
    let download_app = routes::download_router(&cli.reports_dir);

    // Initialize metrics
    metrics::init_metrics();

    let upload_addr = SocketAddr::new(cli.bind, cli.upload_port);
    let download_addr = SocketAddr::new(cli.bind, cli.download_port);
    let upload_listener = tokio::net::TcpListener::bind(upload_addr).await?;
    let download_listener = tokio::net::TcpListener::bind(download_addr).await?;
    tracing::info!("Upload listener on {}", upload_addr);
    tracing::info!("Download listener on {}", download_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let upload_server = axum::serve(upload_listener, upload_app)
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()));
    let download_server =
        axum::serve(download_listener, download_app).with_graceful_shutdown(wait_for(shutdown_rx));

    let servers = async {
        tokio::try_join!(async { upload_server.await }, async {
            download_server.await
        })
    };
    tokio::pin!(servers);

    tokio::select! {
        result = &mut servers => {
            result?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            servers.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
