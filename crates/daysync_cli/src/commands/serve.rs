//! Serve command implementation.

use daysync_server::{http, ServerConfig, SyncServer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Runs the sync server until Ctrl-C.
pub fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let addr = config.bind_addr;
        info!(
            %addr,
            keep_alive_secs = config.keep_alive_interval.as_secs(),
            queue_capacity = config.stream_queue_capacity,
            max_push_batch = config.max_push_batch,
            state_file = ?config.state_path,
            "starting daysync server"
        );

        let server = Arc::new(SyncServer::new(config, daysync_domains::default_table())?);
        let listener = TcpListener::bind(addr).await?;
        http::serve(server, listener, shutdown_signal()).await?;

        info!("server stopped");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed.
        warn!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
