use clap::{Parser, Subcommand};

/// holon-serve — the event ingestion, RPC, and supervisor binary (components
/// D/E/F/G). Pairs with the separate `holon-controller` process (component H).
#[derive(Debug, Parser)]
#[command(name = "holon-serve", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the supervisor, transports, event service, and RPC/stream server
    /// (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration and state dir.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the agent config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as YAML.
    Show,
}

/// Resolve the agent config path: `HOLON_CONFIG_PATH` env var, else
/// `agent-config.yaml` in the current directory.
pub fn config_path() -> String {
    std::env::var("HOLON_CONFIG_PATH").unwrap_or_else(|_| "agent-config.yaml".to_string())
}

/// Resolve the state directory: `HOLON_STATE_DIR` env var, else `state`.
pub fn state_dir() -> String {
    std::env::var("HOLON_STATE_DIR").unwrap_or_else(|_| "state".to_string())
}

/// Load the config from `path`, falling back to an all-defaults config
/// (rpc_only) when the file does not exist — mirrors the teacher's
/// "missing file initializes defaults without error" convention for
/// state stores, extended here to the agent config itself.
pub fn load_config(path: &str) -> anyhow::Result<holon_domain::config::Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(holon_domain::config::Config::load_yaml(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "agent config not found; starting rpc_only with defaults");
            Ok(holon_domain::config::Config::default())
        }
        Err(e) => Err(e.into()),
    }
}
