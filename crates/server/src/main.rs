use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use sgrid::events::EventBus;
use sgrid::queue::LocalSessionQueue;
use sgrid_protocol::Secret;
use sgrid_server::cli::Cli;
use sgrid_server::logging::init_logging;
use sgrid_server::routes::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Sub-second settings make the retry timer useless; floor at 1s.
    let retry_interval = Duration::from_secs(cli.retry_interval.max(1));
    let request_timeout = Duration::from_secs(cli.session_request_timeout.max(1));

    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(LocalSessionQueue::new(
        bus.clone(),
        retry_interval,
        request_timeout,
    ));
    let state = Arc::new(AppState {
        queue: queue.clone(),
        bus,
        secret: cli.registration_secret.map(Secret::new),
    });

    let listener = TcpListener::bind(cli.bind).await?;
    info!(
        target = "sgrid.server",
        addr = %listener.local_addr()?,
        retry_interval_secs = retry_interval.as_secs(),
        request_timeout_secs = request_timeout.as_secs(),
        "session queue listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.stop();
    info!(target = "sgrid.server", "session queue stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(target = "sgrid.server", error = %err, "failed to listen for ctrl-c");
    }
}
