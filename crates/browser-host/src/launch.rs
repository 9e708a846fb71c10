//! Chromium process spawn, verification and exit supervision.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use cdp_wire::DebugEndpoint;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::HostError;
use crate::profile::remove_singleton_locks;

/// Total time budget for the post-spawn liveness ladder.
const VERIFY_BUDGET: Duration = Duration::from_secs(12);
const VERIFY_BACKOFF_MIN: Duration = Duration::from_millis(250);
const VERIFY_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub port: u16,
    pub user_data_dir: PathBuf,
    pub profile_name: String,
}

/// The fixed hardening set plus the per-launch wiring arguments.
pub fn command_line(spec: &LaunchSpec) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={}", spec.port),
        format!("--user-data-dir={}", spec.user_data_dir.display()),
        format!("--profile-directory={}", spec.profile_name),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-blink-features=AutomationControlled".into(),
        "--disable-infobars".into(),
        "--password-store=basic".into(),
        "--use-mock-keychain".into(),
        "--start-maximized".into(),
    ]
}

/// Sent by the monitor task when the spawned process goes away.
#[derive(Clone, Copy, Debug)]
pub struct ExitNotice {
    pub pid: u32,
    pub killed: bool,
}

/// Handle to a spawned browser. Dropping it detaches; the process is only
/// terminated through [`SupervisedProcess::kill`].
#[derive(Debug)]
pub struct SupervisedProcess {
    pid: u32,
    kill_tx: Mutex<Option<mpsc::Sender<oneshot::Sender<()>>>>,
}

impl SupervisedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Terminate the child and wait for it to be reaped.
    pub async fn kill(&self) {
        let sender = { self.kill_tx.lock().await.take() };
        let Some(sender) = sender else { return };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send(ack_tx).await.is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(5), ack_rx).await;
        }
    }
}

/// Spawn Chromium per `spec`, walk the liveness ladder, and attach the exit
/// monitor. `exit_tx` receives exactly one notice when the process ends.
pub async fn spawn_supervised(
    spec: &LaunchSpec,
    endpoint: &DebugEndpoint,
    exit_tx: mpsc::Sender<ExitNotice>,
) -> Result<SupervisedProcess, HostError> {
    remove_singleton_locks(&spec.user_data_dir, &spec.profile_name);

    let args = command_line(spec);
    debug!(target: "browser-host", exe = %spec.executable.display(), ?args, "spawning chromium");

    let mut child = Command::new(&spec.executable)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false)
        .spawn()
        .map_err(|err| HostError::BrowserFailedToStart {
            log: vec![format!("spawn failed: {err}")],
        })?;

    let pid = child.id().unwrap_or_default();
    let mut log = vec![format!("spawned pid {pid}")];

    if let Err(err) = verify_liveness(&mut child, endpoint, &mut log).await {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(err);
    }

    info!(target: "browser-host", pid, port = endpoint.port(), "browser verified alive");

    let (kill_tx, kill_rx) = mpsc::channel(1);
    tokio::spawn(monitor(child, pid, kill_rx, exit_tx));

    Ok(SupervisedProcess {
        pid,
        kill_tx: Mutex::new(Some(kill_tx)),
    })
}

/// child running → pid visible → port listening → version answers, each step
/// retried with bounded backoff inside one overall budget.
async fn verify_liveness(
    child: &mut Child,
    endpoint: &DebugEndpoint,
    log: &mut Vec<String>,
) -> Result<(), HostError> {
    let deadline = Instant::now() + VERIFY_BUDGET;
    let mut backoff = VERIFY_BACKOFF_MIN;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                log.push(format!("child exited during startup: {status}"));
                return Err(HostError::BrowserFailedToStart { log: log.clone() });
            }
            Ok(None) => {}
            Err(err) => log.push(format!("try_wait failed: {err}")),
        }

        if child.id().is_none() {
            log.push("os no longer reports the child pid".into());
            return Err(HostError::BrowserFailedToStart { log: log.clone() });
        }

        if endpoint.port_listening().await {
            match endpoint.version().await {
                Ok(info) => {
                    log.push(format!("version answered: {}", info.browser));
                    return Ok(());
                }
                Err(err) => log.push(format!("version probe failed: {err}")),
            }
        } else {
            log.push(format!("port {} not listening yet", endpoint.port()));
        }

        if Instant::now() >= deadline {
            log.push("startup verification budget exhausted".into());
            return Err(HostError::BrowserFailedToStart { log: log.clone() });
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(VERIFY_BACKOFF_MAX);
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    mut kill_rx: mpsc::Receiver<oneshot::Sender<()>>,
    exit_tx: mpsc::Sender<ExitNotice>,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => debug!(target: "browser-host", pid, %status, "browser process exited"),
                Err(err) => warn!(target: "browser-host", pid, %err, "wait on browser process failed"),
            }
            let _ = exit_tx.send(ExitNotice { pid, killed: false }).await;
        }
        cmd = kill_rx.recv() => {
            match cmd {
                Some(ack) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    let _ = ack.send(());
                    let _ = exit_tx.send(ExitNotice { pid, killed: true }).await;
                }
                None => {
                    // handle dropped: stay detached but still report the exit
                    let _ = child.wait().await;
                    let _ = exit_tx.send(ExitNotice { pid, killed: false }).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_carries_port_profile_and_hardening() {
        let spec = LaunchSpec {
            executable: PathBuf::from("/usr/bin/chromium"),
            port: 9230,
            user_data_dir: PathBuf::from("/tmp/shadow"),
            profile_name: "Default".into(),
        };
        let args = command_line(&spec);
        assert!(args.contains(&"--remote-debugging-port=9230".to_string()));
        assert!(args.contains(&"--profile-directory=Default".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
        for required in [
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--start-maximized",
        ] {
            assert!(args.contains(&required.to_string()), "missing {required}");
        }
    }

    #[tokio::test]
    async fn spawn_of_a_bogus_executable_reports_diagnostics() {
        let spec = LaunchSpec {
            executable: PathBuf::from("/nonexistent/chromehand-test-binary"),
            port: 1,
            user_data_dir: std::env::temp_dir().join("chromehand-spawn-test"),
            profile_name: "Default".into(),
        };
        let endpoint = DebugEndpoint::new(1);
        let (tx, _rx) = mpsc::channel(1);
        match spawn_supervised(&spec, &endpoint, tx).await {
            Err(HostError::BrowserFailedToStart { log }) => {
                assert!(log.iter().any(|line| line.contains("spawn failed")));
            }
            other => panic!("expected BrowserFailedToStart, got {other:?}"),
        }
    }
}
