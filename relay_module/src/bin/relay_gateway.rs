use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use relay_module::gateway::build_router;
use relay_module::mapping_store::build_mapping_store;
use relay_module::{BoxError, RelayConfig, RelayState};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = RelayConfig::from_env()?;

    // Without its store the relay cannot correlate anything; refuse to start.
    let store = build_mapping_store(&config.mapping_store).await?;
    info!(
        "relay gateway mapping_store={} inbox_defaults={} signing={}",
        config.mapping_store.name(),
        config.inbox_channels.len(),
        config.slack_signing_secret.is_some()
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(RelayState::new(config, store));
    let app = build_router(state);

    info!("relay gateway listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("relay gateway shutting down");
}
