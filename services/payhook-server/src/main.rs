//! PayHook Server
//!
//! HTTP surface for the PayHook webhook ingestion core.
//!
//! # Usage
//!
//! ```bash
//! # In-memory backend, paystack secret from the environment
//! PAYHOOK_SECRET_PAYSTACK=sk_test_AAA payhook-server --in-memory
//!
//! # PostgreSQL backend with the outbox worker
//! DATABASE_URL=postgresql://localhost/payhook payhook-server --outbox
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use payhook_adapters::AdapterRegistry;
use payhook_dispatch::{EventDispatcher, HandlerRegistry, OutboxWorker};
use payhook_pipeline::{ProcessorConfig, WebhookProcessor};
use payhook_storage::{InMemoryStorage, PostgresStorage, Storage, StorageConfig};

use payhook_server::config::ServerConfig;
use payhook_server::routes::{create_router, AppState};

/// PayHook - webhook ingestion and payment transaction ledger
#[derive(Parser, Debug)]
#[command(name = "payhook-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "PAYHOOK_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PAYHOOK_PORT")]
    port: Option<u16>,

    /// Use the in-memory backend (development only)
    #[arg(long)]
    in_memory: bool,

    /// Auto-create transactions for unmatched initial payment events
    #[arg(long)]
    auto_create: bool,

    /// Defer dispatch through the transactional outbox
    #[arg(long)]
    outbox: bool,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let mut server_config = ServerConfig::from_env();
    if let Some(host) = args.host {
        server_config.host = host;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }
    server_config.in_memory |= args.in_memory;
    server_config.auto_create_transactions |= args.auto_create;
    server_config.outbox_enabled |= args.outbox;

    let storage: Arc<dyn Storage> = if server_config.in_memory {
        tracing::warn!("using the in-memory backend; data will not survive restarts");
        Arc::new(InMemoryStorage::new())
    } else {
        let storage = PostgresStorage::connect(&StorageConfig::from_env()).await?;
        storage.migrate().await?;
        Arc::new(storage)
    };

    let adapters = AdapterRegistry::with_defaults();
    let mut processor_config = ProcessorConfig {
        auto_create_transactions: server_config.auto_create_transactions,
        timeout_ms: server_config.timeout_ms,
        ..ProcessorConfig::default()
    };
    processor_config.outbox.enabled = server_config.outbox_enabled;
    processor_config.load_secrets_from_env(&adapters.providers());

    // Host deployments register their own handlers here; the server binary
    // ships none by default
    let handlers = HandlerRegistry::new();

    if processor_config.outbox.enabled {
        let dispatcher =
            EventDispatcher::new(Arc::new(handlers.clone()), storage.clone());
        let worker = OutboxWorker::new(
            storage.clone(),
            dispatcher,
            processor_config.outbox.clone(),
        );
        tokio::spawn(worker.run());
    }

    let processor = Arc::new(
        WebhookProcessor::builder()
            .storage(storage.clone())
            .adapters(adapters)
            .handlers(handlers)
            .config(processor_config)
            .build(),
    );

    let app = create_router(AppState { processor, storage });
    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "payhook-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
