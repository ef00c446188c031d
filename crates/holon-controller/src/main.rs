use std::sync::Arc;

use clap::Parser;
use holon_controller::{Driver, ProcessAgentClient, SdkClientConfig};
use holon_domain::config::ControllerConfig;
use tokio_util::sync::CancellationToken;

/// holon-controller — the persistent agent session driver (component H).
/// Reads its tunables from the environment (§6.4) and tails the event
/// channel `holon-serve` writes.
#[derive(Debug, Parser)]
#[command(name = "holon-controller", version, about)]
struct Cli {
    /// Exit after the bootstrap turn instead of tailing the event channel.
    /// Useful for smoke-testing a freshly wired agent SDK command.
    #[arg(long)]
    bootstrap_only: bool,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = ControllerConfig::from_env();
    tracing::info!(
        event_channel = %config.event_channel_path,
        heartbeat_seconds = config.heartbeat_seconds,
        idle_timeout_seconds = config.idle_timeout_seconds,
        total_timeout_seconds = config.total_timeout_seconds,
        "starting controller driver"
    );

    let sdk_config = SdkClientConfig::from_env();
    tracing::info!(command = %sdk_config.command, "spawning agent SDK process");
    let client = Arc::new(ProcessAgentClient::spawn(&sdk_config)?);

    let driver = Driver::new(config, client);

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        shutdown_cancel.cancel();
    });

    if cli.bootstrap_only {
        cancel.cancel();
    }

    driver.run(cancel).await
}
