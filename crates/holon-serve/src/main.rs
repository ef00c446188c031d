mod cli;
mod config_cmd;
mod doctor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use holon_domain::config::{ConfigSeverity, ControllerConfig};
use holon_events::EventService;
use holon_rpc::dispatch::{as_event_handler, as_turn_dispatcher, ChannelDispatcher};
use holon_rpc::{AppState, Broadcaster, Runtime};
use holon_supervisor::{spawn_ack_tail, spawn_health_watch, Supervisor};

use cli::{Cli, Command, ConfigCommand};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn forwarder_helper_path() -> String {
    std::env::var("FORWARDER_HELPER_PATH").unwrap_or_else(|_| "gh-webhook-forward".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli::config_path();
    let state_dir = cli::state_dir();
    let config = cli::load_config(&config_path)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config, config_path, state_dir).await,
        Command::Doctor => {
            let ok = doctor::run(&config, &config_path, &state_dir)?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let ok = config_cmd::validate(&config, &config_path);
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            config_cmd::show(&config);
            Ok(())
        }
    }
}

async fn run_server(
    config: holon_domain::config::Config,
    config_path: String,
    state_dir: String,
) -> anyhow::Result<()> {
    let issues = config.validate();
    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .collect();
    if !errors.is_empty() {
        for issue in &errors {
            tracing::error!("{issue}");
        }
        anyhow::bail!("refusing to start with {} config error(s)", errors.len());
    }
    for issue in issues.iter().filter(|i| i.severity == ConfigSeverity::Warning) {
        tracing::warn!("{issue}");
    }

    std::fs::create_dir_all(&state_dir).context("creating state dir")?;

    let controller_config = ControllerConfig::from_env();

    tracing::info!(
        channel = %controller_config.event_channel_path,
        "opening event channel dispatcher"
    );
    let dispatcher = Arc::new(ChannelDispatcher::open(controller_config.event_channel_path.clone())?);

    let event_service = Arc::new(
        EventService::new(&state_dir, as_event_handler(dispatcher.clone()))
            .context("constructing event service")?,
    );

    let supervisor = Supervisor::new(
        config_path.clone(),
        state_dir.clone(),
        config.server.port,
        forwarder_helper_path(),
        event_service,
    )
    .await
    .context("constructing supervisor")?;

    let broadcaster = Arc::new(Broadcaster::new());
    let runtime_state_path = std::path::Path::new(&state_dir).join("runtime-state.json");
    let runtime = Runtime::new(
        runtime_state_path,
        Duration::from_secs(config.server.turn_idle_ttl_seconds),
        broadcaster,
        as_turn_dispatcher(dispatcher),
    );

    let (ingest_tx, ingest_rx) = tokio::sync::mpsc::channel(config.server.channel_depth);

    let events_log_path = std::path::Path::new(&state_dir).join("events.ndjson");
    let mut app_state = AppState::new(runtime.clone(), ingest_tx).with_events_log_path(events_log_path);
    app_state.max_body_size = config.server.max_body_size;
    app_state.ingest_timeout = Duration::from_millis(config.server.channel_insert_timeout_ms);

    let app = holon_rpc::router(Arc::new(app_state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(%addr, "holon-serve listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    wait_for_health(&config.server.host, config.server.port, Duration::from_secs(3))
        .await
        .context("RPC server did not become healthy within budget")?;

    supervisor.spawn_ingress_consumer(ingest_rx);
    supervisor.start().await;

    let _watcher = supervisor
        .watch_and_reconcile(
            Duration::from_secs(config.supervisor.reload_poll_interval_secs),
            Duration::from_millis(config.supervisor.reload_debounce_ms),
        )
        .context("starting config watcher")?;

    spawn_health_watch(
        supervisor.clone(),
        Duration::from_secs(config.supervisor.reload_poll_interval_secs),
        Duration::from_secs(config.supervisor.forwarder_restart_cooldown_secs),
    );

    if let Some(ack_channel_path) = &controller_config.ack_channel_path {
        tracing::info!(path = %ack_channel_path, "tailing controller ack channel");
        spawn_ack_tail(std::path::PathBuf::from(ack_channel_path.as_str()), runtime.clone());
    }

    server_handle.await.context("server task panicked")?;

    Ok(())
}

/// Poll `GET /health` at 100 ms intervals until it answers 200 or the
/// budget is exhausted (§4.G: "waits for `/health` to respond 200 (≤3 s
/// budget, 100 ms polls)" before starting the chosen transport).
async fn wait_for_health(host: &str, port: u16, budget: Duration) -> anyhow::Result<()> {
    let connect_host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    let url = format!("http://{connect_host}:{port}/health");
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {url} to respond 200");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
