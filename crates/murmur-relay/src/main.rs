use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use murmur_relay::{AppState, ConnectionSettings, RelayConfig};
use tokio::net::TcpListener;
use tracing::info;

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::parse();
    murmur_common::init_tracing_with_default(&config.log_level);
    config.check_public_bind_allowed()?;

    let state = AppState::new(ConnectionSettings::from(&config));
    let app = murmur_relay::app(state);

    let listener = TcpListener::bind(config.listen).await?;
    info!("murmur relay listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
