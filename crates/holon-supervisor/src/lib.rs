//! The subscription supervisor (component G): loads config, starts the
//! RPC+stream server and the desired transport (E), hot-reloads on config
//! change, and supervises forwarder health.

mod ack_tail;
mod health;
mod status;
mod supervisor;
mod transport;
mod watcher;

pub use ack_tail::spawn_ack_tail;
pub use health::spawn_health_watch;
pub use status::{ForwarderStatusBlock, SubscriptionStatus};
pub use supervisor::Supervisor;
pub use transport::{derive_desired, ActiveTransport, DesiredTransport};
pub use watcher::spawn_config_watcher;
