//! Forwarder health watcher (§4.G) — a `tokio::time::interval` poll loop
//! calling `Forwarder::health_check` through the supervisor, with a
//! restart cooldown so a persistently crashing helper doesn't spin.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::supervisor::Supervisor;

pub fn spawn_health_watch(
    supervisor: Arc<Supervisor>,
    poll_interval: Duration,
    restart_cooldown: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(poll_interval);
        loop {
            tick.tick().await;
            supervisor.check_forwarder_health(restart_cooldown).await;
        }
    })
}
