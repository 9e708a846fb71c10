//! Connection orchestrator: the choke point every tool goes through.
//!
//! Owns the singleton browser instance. Lazily verifies it before each tool
//! runs, attaches to an already-running real browser when one answers on the
//! port, and refuses to launch implicitly. Launching is only ever triggered
//! by the explicit launch tool, so a reconnecting stdio client can never pop
//! up the user's browser unsolicited.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cdp_wire::{CdpChannel, DebugEndpoint, TransportEvent, VersionInfo};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::HostError;
use crate::launch::{spawn_supervised, ExitNotice, LaunchSpec, SupervisedProcess};
use crate::locate::locate_chromium;
use crate::profile::{build_shadow_profile, default_user_data_dir, remove_singleton_locks};
use crate::session::SessionManager;
use crate::targets::TargetRegistry;

#[derive(Clone, Debug, Default)]
pub struct LaunchOptions {
    pub profile: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    pub force: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LaunchReport {
    pub port: u16,
    pub attached_existing: bool,
    pub shadow_profile: Option<String>,
    pub pid: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HostStatus {
    pub connected: bool,
    pub port: u16,
    pub managed_pid: Option<u32>,
    pub shadow_profile: Option<String>,
    pub stealth_applied: bool,
    pub page_count: usize,
    pub target_count: usize,
    pub persistent_sessions: usize,
}

struct Instance {
    root: Arc<CdpChannel>,
    process: Option<SupervisedProcess>,
    shadow_profile: Option<PathBuf>,
    pump: JoinHandle<()>,
}

/// Singleton owner of the managed browser connection.
pub struct BrowserHost {
    endpoint: DebugEndpoint,
    registry: Arc<TargetRegistry>,
    sessions: Arc<SessionManager>,
    instance: Mutex<Option<Instance>>,
    exit_tx: mpsc::Sender<ExitNotice>,
    new_pages: broadcast::Sender<String>,
    stealth_applied: AtomicBool,
    teardown_hooks: std::sync::Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl BrowserHost {
    pub fn new(port: u16) -> Arc<Self> {
        let endpoint = DebugEndpoint::new(port);
        let (exit_tx, mut exit_rx) = mpsc::channel(4);
        let (new_pages, _) = broadcast::channel(32);

        let host = Arc::new(Self {
            registry: Arc::new(TargetRegistry::new()),
            sessions: Arc::new(SessionManager::new(endpoint.clone())),
            endpoint,
            instance: Mutex::new(None),
            exit_tx,
            new_pages,
            stealth_applied: AtomicBool::new(false),
            teardown_hooks: std::sync::Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&host);
        tokio::spawn(async move {
            while let Some(notice) = exit_rx.recv().await {
                match weak.upgrade() {
                    Some(host) => host.handle_process_exit(notice).await,
                    None => break,
                }
            }
        });

        host
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn endpoint(&self) -> &DebugEndpoint {
        &self.endpoint
    }

    pub fn registry(&self) -> Arc<TargetRegistry> {
        self.registry.clone()
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Page targets that appear while connected, for per-page setup.
    pub fn subscribe_new_pages(&self) -> broadcast::Receiver<String> {
        self.new_pages.subscribe()
    }

    /// Register a hook run (synchronously) whenever the instance is torn
    /// down, before sessions and targets are cleared.
    pub fn on_teardown(&self, hook: Box<dyn Fn() + Send + Sync>) {
        self.teardown_hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(hook);
    }

    pub fn mark_stealth_applied(&self) {
        self.stealth_applied.store(true, Ordering::Relaxed);
    }

    pub async fn status(&self) -> HostStatus {
        let slot = self.instance.lock().await;
        let instance = slot.as_ref();
        HostStatus {
            connected: instance.is_some(),
            port: self.endpoint.port(),
            managed_pid: instance.and_then(|i| i.process.as_ref().map(|p| p.pid())),
            shadow_profile: instance
                .and_then(|i| i.shadow_profile.as_ref())
                .map(|p| p.display().to_string()),
            stealth_applied: self.stealth_applied.load(Ordering::Relaxed),
            page_count: self.registry.pages().len(),
            target_count: self.registry.all().len(),
            persistent_sessions: self.sessions.persistent_count(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.instance.lock().await.is_some()
    }

    /// The root (browser-endpoint) channel of the live instance, if any.
    pub async fn root_channel(&self) -> Option<Arc<CdpChannel>> {
        self.instance.lock().await.as_ref().map(|i| i.root.clone())
    }

    /// Make sure a working browser connection exists, without ever launching
    /// one. See the module docs for the refusal rationale.
    pub async fn ensure_connected(self: &Arc<Self>) -> Result<(), HostError> {
        let mut slot = self.instance.lock().await;

        if slot.is_some() {
            match self.endpoint.version().await {
                Ok(_) => {
                    if self.registry.pages().is_empty() {
                        if let Ok(list) = self.endpoint.list_targets().await {
                            self.registry.sync(&list);
                        }
                        if self.registry.pages().is_empty() {
                            self.endpoint.open_tab("about:blank").await?;
                            if let Ok(list) = self.endpoint.list_targets().await {
                                self.registry.sync(&list);
                            }
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!(target: "browser-host", %err, "instance stopped answering; tearing down");
                    self.teardown_locked(&mut slot, false).await;
                }
            }
        }

        if !self.endpoint.port_listening().await {
            return Err(HostError::NotConnected);
        }
        let info = self
            .endpoint
            .version()
            .await
            .map_err(|_| HostError::NotConnected)?;
        if !info.is_full_browser() {
            return Err(HostError::PortNotBrowser(format!(
                "{} is answering on port {}",
                info.browser,
                self.endpoint.port()
            )));
        }

        self.attach_locked(&mut slot, info, None, None).await?;
        Ok(())
    }

    /// Unconditionally (re)create the browser instance.
    pub async fn launch(self: &Arc<Self>, opts: LaunchOptions) -> Result<LaunchReport, HostError> {
        let mut slot = self.instance.lock().await;

        if let Some(instance) = slot.as_ref() {
            if !opts.force {
                // already connected: just bring the window forward
                let report = LaunchReport {
                    port: self.endpoint.port(),
                    attached_existing: true,
                    shadow_profile: instance
                        .shadow_profile
                        .as_ref()
                        .map(|p| p.display().to_string()),
                    pid: instance.process.as_ref().map(|p| p.pid()),
                };
                if let Ok(page) = self.registry.resolve(None) {
                    let _ = self.endpoint.activate_tab(&page.id).await;
                }
                return Ok(report);
            }
            self.teardown_locked(&mut slot, false).await;
        }

        // A real browser already owning the port means attach, not spawn.
        if self.endpoint.port_listening().await {
            match self.endpoint.version().await {
                Ok(info) if info.is_full_browser() => {
                    self.attach_locked(&mut slot, info, None, None).await?;
                    return Ok(LaunchReport {
                        port: self.endpoint.port(),
                        attached_existing: true,
                        shadow_profile: None,
                        pid: None,
                    });
                }
                Ok(info) => {
                    return Err(HostError::PortNotBrowser(format!(
                        "{} is already bound to port {}",
                        info.browser,
                        self.endpoint.port()
                    )));
                }
                Err(err) => {
                    return Err(HostError::PortNotBrowser(format!(
                        "port {} is occupied but /json/version does not answer: {err}",
                        self.endpoint.port()
                    )));
                }
            }
        }

        let profile_name = opts.profile.clone().unwrap_or_else(|| "Default".to_string());

        let (data_dir, shadow_profile) = match opts.user_data_dir.clone() {
            Some(dir) => {
                remove_singleton_locks(&dir, &profile_name);
                (dir, None)
            }
            None => {
                let source = default_user_data_dir().ok_or_else(|| {
                    HostError::Profile("no platform profile location found".into())
                })?;
                // the mirror can run for seconds on a big profile
                let mirror_source = source.clone();
                let mirror_profile = profile_name.clone();
                let mirrored = tokio::task::spawn_blocking(move || {
                    build_shadow_profile(&mirror_source, &mirror_profile)
                })
                .await
                .map_err(|err| HostError::Internal(format!("mirror task failed: {err}")))?;
                match mirrored {
                    Ok(shadow) => (shadow.clone(), Some(shadow)),
                    Err(err) => {
                        // first run on a machine without that profile: start fresh
                        info!(target: "browser-host", %err, "source profile unavailable; using a fresh shadow dir");
                        let fresh = crate::profile::shadow_root_for(&source);
                        std::fs::create_dir_all(&fresh)?;
                        remove_singleton_locks(&fresh, &profile_name);
                        (fresh.clone(), Some(fresh))
                    }
                }
            }
        };

        let executable = locate_chromium(opts.chrome_path.as_ref())?;
        let spec = LaunchSpec {
            executable,
            port: self.endpoint.port(),
            user_data_dir: data_dir,
            profile_name,
        };

        let process = spawn_supervised(&spec, &self.endpoint, self.exit_tx.clone()).await?;
        let pid = process.pid();

        let info = self.endpoint.version().await?;
        if !info.is_full_browser() {
            process.kill().await;
            return Err(HostError::PortNotBrowser(info.browser));
        }

        self.attach_locked(&mut slot, info, Some(process), shadow_profile.clone())
            .await?;

        Ok(LaunchReport {
            port: self.endpoint.port(),
            attached_existing: false,
            shadow_profile: shadow_profile.map(|p| p.display().to_string()),
            pid: Some(pid),
        })
    }

    /// Explicit shutdown, the only code path allowed to kill the process.
    pub async fn close(&self) -> bool {
        let mut slot = self.instance.lock().await;
        let had_process = slot
            .as_ref()
            .map(|i| i.process.is_some())
            .unwrap_or(false);
        self.teardown_locked(&mut slot, true).await;
        had_process
    }

    async fn attach_locked(
        self: &Arc<Self>,
        slot: &mut Option<Instance>,
        info: VersionInfo,
        process: Option<SupervisedProcess>,
        shadow_profile: Option<PathBuf>,
    ) -> Result<(), HostError> {
        if info.web_socket_debugger_url.is_empty() {
            return Err(HostError::Internal(
                "/json/version did not expose a browser websocket url".into(),
            ));
        }

        let root = Arc::new(CdpChannel::connect(&info.web_socket_debugger_url).await?);
        root.send("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;

        let list = self.endpoint.list_targets().await.unwrap_or_default();
        self.registry.sync(&list);

        let pump = tokio::spawn(Self::root_pump(Arc::downgrade(self), root.subscribe()));

        info!(
            target: "browser-host",
            browser = %info.browser,
            port = self.endpoint.port(),
            managed = process.is_some(),
            "browser instance attached"
        );

        *slot = Some(Instance {
            root,
            process,
            shadow_profile,
            pump,
        });
        Ok(())
    }

    async fn root_pump(host: Weak<Self>, mut rx: broadcast::Receiver<TransportEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(host) = host.upgrade() else { break };
                    for page in host.registry.apply_event(&event) {
                        let _ = host.new_pages.send(page);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "browser-host", skipped, "root event pump lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if let Some(host) = host.upgrade() {
                        warn!(target: "browser-host", "root channel gone; scheduling teardown");
                        tokio::spawn(async move {
                            let mut slot = host.instance.lock().await;
                            host.teardown_locked(&mut slot, false).await;
                        });
                    }
                    break;
                }
            }
        }
    }

    /// Chromium sometimes re-parents its window process: the spawn handle
    /// dies while the browser keeps running. Re-probe once before declaring
    /// the instance dead.
    async fn handle_process_exit(&self, notice: ExitNotice) {
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut slot = self.instance.lock().await;
        let Some(instance) = slot.as_mut() else { return };
        let matches = instance
            .process
            .as_ref()
            .map(|p| p.pid() == notice.pid)
            .unwrap_or(false);
        if !matches {
            return;
        }

        if !notice.killed {
            if let Ok(info) = self.endpoint.version().await {
                if info.is_full_browser() {
                    info!(
                        target: "browser-host",
                        pid = notice.pid,
                        "spawn handle exited but the browser is still answering; keeping instance"
                    );
                    instance.process = None;
                    return;
                }
            }
        }

        warn!(target: "browser-host", pid = notice.pid, "browser process gone; tearing down");
        self.teardown_locked(&mut slot, false).await;
    }

    /// Clear all downstream state atomically. Holding the instance lock for
    /// the whole teardown is what makes the transition atomic for callers.
    async fn teardown_locked(&self, slot: &mut Option<Instance>, kill: bool) {
        let Some(instance) = slot.take() else { return };

        {
            let hooks = self
                .teardown_hooks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for hook in hooks.iter() {
                hook();
            }
        }

        self.sessions.clear().await;
        self.registry.clear();
        self.stealth_applied.store(false, Ordering::Relaxed);

        instance.pump.abort();
        instance.root.close();

        if let Some(process) = instance.process {
            if kill {
                process.kill().await;
            }
        }

        info!(target: "browser-host", killed = kill, "browser instance torn down");
    }
}
