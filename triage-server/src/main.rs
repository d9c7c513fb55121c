use triage_core::config::TriageConfig;
use triage_core::runtime::{start_poller, LogSink};
use triage_server::{app, logging, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = TriageConfig::from_env();
    tracing::info!(?config, "loaded configuration");

    let state = state::build_state(&config)?;
    let poller = start_poller(state.dashboard.clone(), config.poll_interval, LogSink)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "triage-server listening");
    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    tracing::info!("shutting down poller");
    tokio::task::spawn_blocking(move || poller.stop()).await?;
    served?;
    Ok(())
}
