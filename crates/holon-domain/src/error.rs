/// Shared error type used across all holon crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("handler requested skip: {0}")]
    Skip(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Sentinel error a [`crate::EventHandler`] returns to request a deliberate,
/// non-failing skip of the current envelope. Distinguished from other
/// handler errors so the event service can record `status = "skipped"`
/// instead of `status = "failed"`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SkipEventError(pub String);
