//! Forwarder subprocess (component E1) — supervises an external "webhook
//! forward" helper as a child process group.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const GRACE_PERIOD: Duration = Duration::from_millis(1200);
const STOP_TERM_WAIT: Duration = Duration::from_secs(5);
const STOP_KILL_WAIT: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("invalid forwarder configuration: {0}")]
    Config(String),
    #[error("forwarder is unhealthy: {0}")]
    Unhealthy(String),
    #[error("forwarder start/stop already in progress")]
    Busy,
    #[error("forwarder failed to start: {0}")]
    StartFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub port: u16,
    pub repos: Vec<String>,
    pub target_url: String,
    /// Path (or bare name on `$PATH`) of the forward-helper binary.
    pub helper_path: String,
}

impl ForwarderConfig {
    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.port == 0 {
            return Err(ForwarderError::Config("port must be in (0, 65535]".into()));
        }
        if self.repos.is_empty() || !self.repos.iter().all(|r| holon_domain::config::is_valid_repo(r))
        {
            return Err(ForwarderError::Config(
                "at least one repo in owner/name form is required".into(),
            ));
        }
        if self.target_url.is_empty() {
            return Err(ForwarderError::Config("target_url must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HookInfo {
    pub id: u64,
    pub url: String,
}

/// Queries the platform's hook listing for a repo — a thin seam so tests
/// can stub the lookup (scenario S6) without a live network call.
#[async_trait]
pub trait HookLister: Send + Sync {
    async fn list_hooks(&self, repo: &str) -> Result<Vec<HookInfo>, ForwarderError>;
}

enum RunState {
    Stopped,
    Transitioning,
    Running {
        child: Child,
        pgid: i32,
        stderr_tail: std::sync::Arc<Mutex<VecDeque<String>>>,
    },
}

/// Supervises the forwarder helper as a child process group: start probes
/// `--help` to pick `--url` vs `--port`, diagnoses early-exit conflicts,
/// and `Stop` escalates SIGTERM → SIGKILL with a bounded wait.
pub struct Forwarder {
    config: ForwarderConfig,
    state: Mutex<RunState>,
    hook_lister: Option<std::sync::Arc<dyn HookLister>>,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self, ForwarderError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(RunState::Stopped),
            hook_lister: None,
        })
    }

    pub fn with_hook_lister(mut self, lister: std::sync::Arc<dyn HookLister>) -> Self {
        self.hook_lister = Some(lister);
        self
    }

    /// Start the helper, forwarding each stdout line (assumed to be a JSON
    /// webhook payload) to `out`. Returns once past the grace period or
    /// immediately on a diagnosed startup failure.
    pub async fn start(&self, out: mpsc::Sender<String>) -> Result<(), ForwarderError> {
        {
            let mut guard = self.state.lock();
            match &*guard {
                RunState::Stopped => *guard = RunState::Transitioning,
                _ => return Err(ForwarderError::Busy),
            }
        }

        let use_url_flag = probe_prefers_url_flag(&self.config.helper_path).await;

        let mut cmd = Command::new(&self.config.helper_path);
        if use_url_flag {
            cmd.arg("--url").arg(&self.config.target_url);
        } else {
            cmd.arg("--port").arg(self.config.port.to_string());
        }
        for repo in &self.config.repos {
            cmd.arg("--repo").arg(repo);
        }
        // Fixed event filter: only the events this core's normalizer knows.
        cmd.arg("--events").arg(
            "issues,issue_comment,pull_request,pull_request_review,pull_request_review_comment,check_suite",
        );
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| {
            self.reset_to_stopped();
            ForwarderError::StartFailed(format!("spawn failed: {e}"))
        })?;
        let pid = child.id().ok_or_else(|| {
            ForwarderError::StartFailed("child exited before pid was available".into())
        })?;
        let pgid = pid as i32;

        let stderr_tail = std::sync::Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut t = tail.lock();
                    if t.len() == STDERR_TAIL_LINES {
                        t.pop_front();
                    }
                    t.push_back(line);
                }
            });
        }
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if out.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        tokio::select! {
            status = child.wait() => {
                let tail = stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n");
                self.reset_to_stopped();
                let diagnosis = self.diagnose_early_exit(&tail).await;
                return Err(ForwarderError::StartFailed(format!(
                    "helper exited early ({status:?}): {diagnosis}"
                )));
            }
            _ = tokio::time::sleep(GRACE_PERIOD) => {}
        }

        let mut guard = self.state.lock();
        *guard = RunState::Running {
            child,
            pgid,
            stderr_tail,
        };
        Ok(())
    }

    fn reset_to_stopped(&self) {
        *self.state.lock() = RunState::Stopped;
    }

    async fn diagnose_early_exit(&self, stderr_tail: &str) -> String {
        if !stderr_tail.contains("Hook already exists on this repository") {
            return stderr_tail.to_string();
        }
        let Some(lister) = &self.hook_lister else {
            return format!("{stderr_tail} (no hook lister configured to diagnose further)");
        };
        for repo in &self.config.repos {
            if let Ok(hooks) = lister.list_hooks(repo).await {
                if let Some(hook) = hooks
                    .iter()
                    .find(|h| urls_equivalent(&h.url, &self.config.target_url))
                {
                    return format!(
                        "existing hook id {} on {repo} targets this forwarder; remove it with: gh api -X DELETE repos/{repo}/hooks/{}",
                        hook.id, hook.id
                    );
                }
            }
        }
        format!("{stderr_tail} (could not locate the conflicting hook)")
    }

    /// Sends signal 0 to the child process; its absence is unhealthy.
    pub fn health_check(&self) -> Result<(), ForwarderError> {
        let guard = self.state.lock();
        match &*guard {
            RunState::Running { pgid, .. } => {
                #[cfg(unix)]
                {
                    let rc = unsafe { libc::kill(*pgid, 0) };
                    if rc != 0 {
                        return Err(ForwarderError::Unhealthy(
                            "process group not found".into(),
                        ));
                    }
                }
                Ok(())
            }
            _ => Err(ForwarderError::Unhealthy("forwarder is not running".into())),
        }
    }

    /// SIGTERM the process group, wait up to 5s, escalate to SIGKILL and
    /// wait up to 2s more.
    pub async fn stop(&self) -> Result<(), ForwarderError> {
        let (mut child, pgid) = {
            let mut guard = self.state.lock();
            match std::mem::replace(&mut *guard, RunState::Transitioning) {
                RunState::Running { child, pgid, .. } => (child, pgid),
                other => {
                    *guard = other;
                    return Err(ForwarderError::Busy);
                }
            }
        };

        #[cfg(unix)]
        unsafe {
            libc::kill(-pgid, libc::SIGTERM);
        }

        let term_wait = tokio::time::timeout(STOP_TERM_WAIT, child.wait()).await;
        if term_wait.is_err() {
            #[cfg(unix)]
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
            let _ = tokio::time::timeout(STOP_KILL_WAIT, child.wait()).await;
        }

        self.reset_to_stopped();
        Ok(())
    }
}

/// Default [`HookLister`] backed by the GitHub REST API
/// (`GET /repos/{repo}/hooks`), authenticated with `GITHUB_TOKEN`.
pub struct GithubHookLister {
    client: reqwest::Client,
}

impl Default for GithubHookLister {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HookLister for GithubHookLister {
    async fn list_hooks(&self, repo: &str) -> Result<Vec<HookInfo>, ForwarderError> {
        let token = std::env::var("GITHUB_TOKEN").unwrap_or_default();
        let resp = self
            .client
            .get(format!("https://api.github.com/repos/{repo}/hooks"))
            .header("User-Agent", "holon-serve")
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ForwarderError::StartFailed(format!("hook listing request failed: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ForwarderError::StartFailed(format!("hook listing body: {e}")))?;
        let hooks = body
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|h| {
                        let id = h.get("id")?.as_u64()?;
                        let url = h.get("config")?.get("url")?.as_str()?.to_string();
                        Some(HookInfo { id, url })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hooks)
    }
}

/// Probe the helper's `--help` output to pick `--url` over `--port` — the
/// helper's flag name has drifted across versions.
async fn probe_prefers_url_flag(helper_path: &str) -> bool {
    let output = Command::new(helper_path).arg("--help").output().await;
    match output {
        Ok(out) => {
            let text = format!(
                "{}{}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            );
            text.contains("--url")
        }
        Err(_) => false,
    }
}

/// `localhost`/`127.0.0.1` and default scheme ports compare equal.
fn urls_equivalent(a: &str, b: &str) -> bool {
    normalize_url(a) == normalize_url(b)
}

fn normalize_url(raw: &str) -> (String, String, u16) {
    let (scheme, rest) = raw.split_once("://").unwrap_or(("http", raw));
    let rest = rest.trim_end_matches('/');
    let (hostport, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (mut host, port) = hostport.split_once(':').map_or((hostport, None), |(h, p)| {
        (h, p.parse::<u16>().ok())
    });
    if host == "127.0.0.1" {
        host = "localhost";
    }
    let default_port = if scheme == "https" { 443 } else { 80 };
    (
        host.to_string(),
        path.to_string(),
        port.unwrap_or(default_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_equivalence_treats_localhost_and_loopback_as_equal() {
        assert!(urls_equivalent(
            "http://localhost:8080/ingress",
            "http://127.0.0.1:8080/ingress"
        ));
        assert!(urls_equivalent("http://localhost/x", "http://localhost:80/x"));
        assert!(!urls_equivalent(
            "http://localhost:8080/ingress",
            "http://localhost:9090/ingress"
        ));
    }

    #[test]
    fn config_validation_rejects_bad_repo_and_empty_url() {
        let bad_repo = ForwarderConfig {
            port: 8080,
            repos: vec!["not-a-repo".into()],
            target_url: "http://localhost:8080/x".into(),
            helper_path: "gh-webhook-forward".into(),
        };
        assert!(bad_repo.validate().is_err());

        let no_url = ForwarderConfig {
            port: 8080,
            repos: vec!["org/repo".into()],
            target_url: "".into(),
            helper_path: "gh-webhook-forward".into(),
        };
        assert!(no_url.validate().is_err());
    }
}
