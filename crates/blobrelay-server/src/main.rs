use blobrelay_server::{CliArgs, MemoryStore, RelayServer, ServerConfig, ServerHandle};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = blobrelay_server::server::telemetry::init_telemetry(&config)?;

    let server = RelayServer::new(config, Arc::new(MemoryStore::new()));
    tokio::spawn(shutdown_signal(server.handle()));

    let res = server.run().await;
    if let Err(e) = &res {
        tracing::error!(error = %e, "Server exited with an error");
    } else {
        tracing::info!("Service shut down successfully");
    }

    providers.shutdown();
    res
}

/// First signal drains gracefully; a second one forces the stop.
async fn shutdown_signal(handle: ServerHandle) {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install signal handler");

    for attempt in 0..2 {
        #[cfg(unix)]
        let terminate = async {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        tokio::select! {
            () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
            () = terminate => tracing::info!("Received SIGTERM signal"),
        }

        if attempt == 0 {
            tracing::info!("Shutdown signal received, terminating gracefully...");
            handle.stop();
        } else {
            tracing::warn!("Second shutdown signal received, forcing stop");
            handle.panic_stop();
        }
    }
}
