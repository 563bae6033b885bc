//! Agent Server Handle (C4): a pooled, health-checked handle to an external
//! agent-server child process bound to one workspace.
//!
//! Process supervision follows the same shape as the teacher's dev-server
//! launcher: spawn with piped output, poll a readiness signal before
//! declaring the process usable, and tear down with SIGTERM followed by a
//! grace-period SIGKILL. Here the readiness signal is a health endpoint
//! rather than a line in stdout, and a pidfile makes the handle reusable
//! across daemon restarts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READY_POLL_ATTEMPTS: u32 = 30;
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum AgentServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent server did not become healthy within {0:?}")]
    NotReady(Duration),

    #[error("failed to spawn agent server: {0}")]
    SpawnFailed(String),
}

/// The pidfile written to `<prefix>/run/<name>.json` (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PidRecord {
    pid: u32,
    health_url: String,
    base_url: String,
}

/// A live handle to an agent-server process: an HTTP base URL plus the
/// means to tear it down.
pub struct AgentServerHandle {
    name: String,
    pidfile_path: PathBuf,
    base_url: String,
    child: Option<Child>,
    killed: bool,
}

impl AgentServerHandle {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Idempotent: sends SIGTERM, waits up to [`SHUTDOWN_GRACE_PERIOD`], then
    /// SIGKILL, then removes the pidfile. Safe to call on a handle that was
    /// reused from an existing process (in which case there is no child to
    /// reap, but the pidfile is still removed).
    pub async fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        if let Some(mut child) = self.child.take() {
            terminate_gracefully(&mut child, SHUTDOWN_GRACE_PERIOD).await;
        }
        let _ = std::fs::remove_file(&self.pidfile_path);
    }
}

impl Drop for AgentServerHandle {
    fn drop(&mut self) {
        if !self.killed {
            warn!(name = %self.name, "agent server handle dropped without kill() being called");
        }
    }
}

/// Acquires a handle for `name` bound to `workspace`: reuses a healthy
/// process recorded at `<prefix>/run/<name>.json` if one exists, otherwise
/// kills any stale record and spawns `command` with `args` fresh.
pub async fn acquire(
    prefix: &Path,
    name: &str,
    workspace: &Path,
    command: &str,
    args: &[String],
    port: u16,
) -> Result<AgentServerHandle, AgentServerError> {
    let run_dir = prefix.join("run");
    std::fs::create_dir_all(&run_dir)?;
    let pidfile_path = run_dir.join(format!("{name}.json"));

    if let Some(record) = read_pidfile(&pidfile_path) {
        if process_alive(record.pid) && health_ok(&record.health_url).await {
            debug!(name, pid = record.pid, "reusing live agent server");
            return Ok(AgentServerHandle {
                name: name.to_string(),
                pidfile_path,
                base_url: record.base_url,
                child: None,
                killed: false,
            });
        }
        debug!(name, pid = record.pid, "stale agent server record, killing");
        kill_pid(record.pid);
        let _ = std::fs::remove_file(&pidfile_path);
    }

    let mut child = Command::new(command)
        .args(args)
        .current_dir(workspace)
        .env("PORT", port.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| AgentServerError::SpawnFailed(e.to_string()))?;

    let pid = child.id().ok_or_else(|| {
        AgentServerError::SpawnFailed("spawned process has no pid".to_string())
    })?;

    let base_url = format!("http://127.0.0.1:{port}");
    let health_url = format!("{base_url}/health");

    let mut healthy = false;
    for _ in 0..READY_POLL_ATTEMPTS {
        if health_ok(&health_url).await {
            healthy = true;
            break;
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(AgentServerError::SpawnFailed(format!(
                "agent server exited during startup: {status:?}"
            )));
        }
        sleep(READY_POLL_INTERVAL).await;
    }
    if !healthy {
        let mut child = child;
        terminate_gracefully(&mut child, SHUTDOWN_GRACE_PERIOD).await;
        return Err(AgentServerError::NotReady(
            READY_POLL_INTERVAL * READY_POLL_ATTEMPTS,
        ));
    }

    let record = PidRecord {
        pid,
        health_url: health_url.clone(),
        base_url: base_url.clone(),
    };
    write_pidfile(&pidfile_path, &record)?;

    Ok(AgentServerHandle {
        name: name.to_string(),
        pidfile_path,
        base_url,
        child: Some(child),
        killed: false,
    })
}

fn read_pidfile(path: &Path) -> Option<PidRecord> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_pidfile(path: &Path, record: &PidRecord) -> Result<(), AgentServerError> {
    let content = serde_json::to_string_pretty(record).expect("pid record always serializes");
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}

async fn health_ok(health_url: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(HEALTH_CHECK_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    matches!(client.get(health_url).send().await, Ok(resp) if resp.status().is_success())
}

#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child, grace_period: Duration) {
    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        if kill(pid, Signal::SIGTERM).is_err() {
            let _ = child.wait().await;
            return;
        }
        match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = kill(pid, Signal::SIGKILL);
                let _ = child.wait().await;
            }
        }
    } else {
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child, _grace_period: Duration) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}
