//! Hot-reload config watcher — `notify::PollWatcher` plus poll-interval
//! and debounce, grounded on agtrace-runtime's `SessionWatcher` pattern of
//! a sync `std::sync::mpsc` channel fed from the watcher callback, bridged
//! here into the async world via a blocking relay task.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use notify::{Event, PollWatcher, RecursiveMode, Watcher};

use holon_domain::config::Config;

/// Watches `config_path`'s parent directory and calls `on_change` with the
/// freshly parsed config at most once per debounce window. A malformed
/// config on reload is logged and otherwise ignored — the previously
/// active transport is left running (I5).
pub fn spawn_config_watcher<F>(
    config_path: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    on_change: F,
) -> notify::Result<PollWatcher>
where
    F: Fn(Config) + Send + 'static,
{
    let (tx, rx) = channel::<Event>();
    let watch_config = notify::Config::default().with_poll_interval(poll_interval);
    let mut watcher = PollWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        watch_config,
    )?;

    let watch_dir = parent_dir(&config_path);
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

    let path = config_path.clone();
    std::thread::spawn(move || debounce_loop(rx, debounce, path, on_change));

    Ok(watcher)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

/// Coalesces a burst of filesystem events into a single reload: waits for
/// `debounce` of silence after the first event before reloading.
fn debounce_loop<F>(rx: std::sync::mpsc::Receiver<Event>, debounce: Duration, config_path: PathBuf, on_change: F)
where
    F: Fn(Config),
{
    loop {
        let first = match rx.recv() {
            Ok(e) => e,
            Err(_) => return,
        };
        if !touches(&first, &config_path) {
            continue;
        }
        loop {
            match rx.recv_timeout(debounce) {
                Ok(e) if touches(&e, &config_path) => continue,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        match load(&config_path) {
            Ok(cfg) => on_change(cfg),
            Err(e) => tracing::warn!(error = %e, "config reload: failed to parse; keeping previous config"),
        }
    }
}

fn touches(event: &Event, config_path: &Path) -> bool {
    event.paths.iter().any(|p| p == config_path)
}

fn load(config_path: &Path) -> holon_domain::Result<Config> {
    let raw = std::fs::read_to_string(config_path)?;
    Config::load_yaml(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn reload_fires_on_file_write_and_debounces_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("agent-config.yaml");
        std::fs::write(&config_path, "server:\n  port: 8080\n").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let _watcher = spawn_config_watcher(
            config_path.clone(),
            Duration::from_millis(20),
            Duration::from_millis(80),
            move |_cfg| {
                calls_cb.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        // Two rapid writes should debounce into a single reload.
        std::fs::write(&config_path, "server:\n  port: 8081\n").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        std::fs::write(&config_path, "server:\n  port: 8082\n").unwrap();

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_config_does_not_invoke_callback() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("agent-config.yaml");
        std::fs::write(&config_path, "server:\n  port: 8080\n").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let _watcher = spawn_config_watcher(
            config_path.clone(),
            Duration::from_millis(20),
            Duration::from_millis(60),
            move |_cfg| {
                calls_cb.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        std::fs::write(&config_path, "not: [valid, yaml: structure").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
