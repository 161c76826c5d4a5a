//! wsbridge - WebSocket to TCP byte-stream relay with reconnecting backend.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wsbridge::{Cli, RelayServer, SessionRegistry};

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.into_config();
    tracing::debug!(?config, "relay configuration");

    let registry = Arc::new(SessionRegistry::new());

    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let result = runtime.block_on(async {
        let server = RelayServer::bind(config, registry).await?;
        server.run().await
    });

    if let Err(e) = result {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
