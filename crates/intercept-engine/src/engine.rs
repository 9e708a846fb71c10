//! Per-target interception contexts and the paused-request state machine.
//!
//! The one absolute invariant: every `Fetch.requestPaused` gets exactly one
//! terminal CDP call (continueRequest, continueResponse, fulfillRequest or
//! failRequest), or the page hangs. The claim on the request record is taken
//! before any terminal call goes out, so the dispatch path, tool-driven
//! resolutions, delay tasks and the timeout watchdog collapse to one winner.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cdp_wire::{CdpChannel, TransportEvent, WireError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{WsFrame, WsLog};
use crate::error::EngineError;
use crate::har::HarRecorder;
use crate::pause::{Disposition, PausedRequest};
use crate::rules::{
    decide, Decision, InterceptRule, InterceptStage, MockEndpoint, Modification, PauseView,
};

/// Purpose keys for the persistent sessions this engine owns.
pub const PURPOSE_INTERCEPT: &str = "intercept";
pub const PURPOSE_WS_CAPTURE: &str = "ws-capture";

/// Default deadline before a parked pause is resumed as-is.
pub const DEFAULT_PAUSE_TIMEOUT_MS: u64 = 30_000;

/// Resolved records kept around for inspection before pruning.
const MAX_TRACKED_REQUESTS: usize = 256;

type ReleaseHook = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Clone, Debug, Default, Serialize)]
pub struct TargetStats {
    pub pending: usize,
    pub rules: usize,
    pub mocks: usize,
    pub mocked: u64,
    pub modified: u64,
    pub resumed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    pub contexts: usize,
    pub pending: usize,
    pub rules: usize,
    pub mocks: usize,
    pub har_targets: usize,
    pub ws_capture_targets: usize,
}

#[derive(Default)]
struct ModeState {
    request_patterns: Vec<String>,
    response_patterns: Vec<String>,
}

impl ModeState {
    fn is_empty(&self) -> bool {
        self.request_patterns.is_empty() && self.response_patterns.is_empty()
    }
}

struct TargetContext {
    target_id: String,
    channel: Arc<CdpChannel>,
    rules: RwLock<Vec<InterceptRule>>,
    mocks: RwLock<Vec<MockEndpoint>>,
    modes: RwLock<ModeState>,
    pending: DashMap<String, PausedRequest>,
    arrival_order: Mutex<VecDeque<String>>,
    auto_continue: AtomicBool,
    pause_timeout_ms: AtomicU64,
    har: Mutex<HarRecorder>,
    har_enabled: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
    terminal_calls: DashMap<String, u32>,
    mocked: AtomicU64,
    modified: AtomicU64,
    resumed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

struct WsCaptureHandle {
    log: Arc<Mutex<WsLog>>,
    pump: JoinHandle<()>,
}

/// Engine owning one interception context per page target.
pub struct InterceptionEngine {
    contexts: DashMap<String, Arc<TargetContext>>,
    ws_captures: DashMap<String, WsCaptureHandle>,
    release: Mutex<Option<ReleaseHook>>,
}

impl InterceptionEngine {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            ws_captures: DashMap::new(),
            release: Mutex::new(None),
        }
    }

    /// Hook invoked when the engine is done with a persistent session.
    pub fn set_release_hook(&self, hook: ReleaseHook) {
        *self.release.lock() = Some(hook);
    }

    fn release_session(&self, target_id: &str, purpose: &str) {
        if let Some(hook) = self.release.lock().as_ref() {
            hook(target_id, purpose);
        }
    }

    fn context(&self, target_id: &str) -> Result<Arc<TargetContext>, EngineError> {
        self.contexts
            .get(target_id)
            .map(|kv| kv.value().clone())
            .ok_or_else(|| EngineError::NoContext(target_id.to_string()))
    }

    fn context_or_create(&self, target_id: &str, channel: Arc<CdpChannel>) -> Arc<TargetContext> {
        if let Some(existing) = self.contexts.get(target_id) {
            return existing.value().clone();
        }
        let ctx = Arc::new(TargetContext {
            target_id: target_id.to_string(),
            channel,
            rules: RwLock::new(Vec::new()),
            mocks: RwLock::new(Vec::new()),
            modes: RwLock::new(ModeState::default()),
            pending: DashMap::new(),
            arrival_order: Mutex::new(VecDeque::new()),
            auto_continue: AtomicBool::new(true),
            pause_timeout_ms: AtomicU64::new(DEFAULT_PAUSE_TIMEOUT_MS),
            har: Mutex::new(HarRecorder::new()),
            har_enabled: AtomicBool::new(false),
            pump: Mutex::new(None),
            terminal_calls: DashMap::new(),
            mocked: AtomicU64::new(0),
            modified: AtomicU64::new(0),
            resumed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        });
        ctx.start_pump();
        self.contexts.insert(target_id.to_string(), ctx.clone());
        ctx
    }

    /// Enable interception at one stage. Response-modification and mock
    /// fulfillment are mutually exclusive per target (a conservative reading
    /// of "overlapping patterns"): the caller is told which one to disable.
    pub async fn enable(
        &self,
        target_id: &str,
        channel: Arc<CdpChannel>,
        stage: InterceptStage,
        patterns: Vec<String>,
        auto_continue: bool,
        pause_timeout_ms: Option<u64>,
    ) -> Result<(), EngineError> {
        let ctx = self.context_or_create(target_id, channel);
        if stage == InterceptStage::Response && !ctx.mocks.read().is_empty() {
            return Err(EngineError::ModeConflict(
                "mock endpoints are active on this target; clear them before enabling response interception".into(),
            ));
        }

        {
            let mut modes = ctx.modes.write();
            match stage {
                InterceptStage::Request => modes.request_patterns = patterns,
                InterceptStage::Response => modes.response_patterns = patterns,
            }
        }
        ctx.auto_continue.store(auto_continue, Ordering::Relaxed);
        if let Some(ms) = pause_timeout_ms {
            ctx.pause_timeout_ms.store(ms, Ordering::Relaxed);
        }
        ctx.sync_fetch().await?;
        info!(target: "intercept", target_id, stage = ?stage, auto_continue, "interception enabled");
        Ok(())
    }

    /// Disable one stage (or everything). Still-paused requests are drained
    /// by resuming them unmodified before patterns go away; when nothing is
    /// left the context is dropped and its session released.
    pub async fn disable(
        &self,
        target_id: &str,
        stage: Option<InterceptStage>,
    ) -> Result<usize, EngineError> {
        let ctx = self.context(target_id)?;
        let drained = ctx.drain(stage).await;

        {
            let mut modes = ctx.modes.write();
            match stage {
                Some(InterceptStage::Request) => modes.request_patterns.clear(),
                Some(InterceptStage::Response) => modes.response_patterns.clear(),
                None => *modes = ModeState::default(),
            }
        }
        {
            let mut rules = ctx.rules.write();
            match stage {
                Some(s) => rules.retain(|r| r.stage != s),
                None => rules.clear(),
            }
        }
        if stage.is_none() {
            ctx.mocks.write().clear();
        }

        self.teardown_if_idle(&ctx).await?;
        info!(target: "intercept", target_id, ?stage, drained, "interception disabled");
        Ok(drained)
    }

    async fn teardown_if_idle(&self, ctx: &Arc<TargetContext>) -> Result<(), EngineError> {
        if ctx.is_idle() {
            let _ = ctx.channel.send("Fetch.disable", json!({})).await;
            ctx.stop_pump();
            self.contexts.remove(&ctx.target_id);
            self.release_session(&ctx.target_id, PURPOSE_INTERCEPT);
        } else {
            ctx.sync_fetch().await?;
        }
        Ok(())
    }

    pub fn add_rule(&self, target_id: &str, rule: InterceptRule) -> Result<String, EngineError> {
        let ctx = self.context(target_id)?;
        let id = rule.id.clone();
        ctx.rules.write().push(rule);
        Ok(id)
    }

    pub fn remove_rule(&self, target_id: &str, rule_id: &str) -> Result<bool, EngineError> {
        let ctx = self.context(target_id)?;
        let mut rules = ctx.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        Ok(rules.len() != before)
    }

    pub async fn add_mock(
        &self,
        target_id: &str,
        channel: Arc<CdpChannel>,
        mock: MockEndpoint,
    ) -> Result<String, EngineError> {
        let ctx = self.context_or_create(target_id, channel);
        if !ctx.modes.read().response_patterns.is_empty() {
            return Err(EngineError::ModeConflict(
                "response interception is active on this target; disable it before creating mock endpoints".into(),
            ));
        }
        let id = mock.id.clone();
        ctx.mocks.write().push(mock);
        ctx.sync_fetch().await?;
        Ok(id)
    }

    pub async fn delete_mock(&self, target_id: &str, mock_id: &str) -> Result<bool, EngineError> {
        let ctx = self.context(target_id)?;
        let removed = {
            let mut mocks = ctx.mocks.write();
            let before = mocks.len();
            mocks.retain(|m| m.id != mock_id);
            mocks.len() != before
        };
        if removed {
            self.teardown_if_idle(&ctx).await?;
        }
        Ok(removed)
    }

    pub async fn clear_mocks(&self, target_id: &str) -> Result<usize, EngineError> {
        let ctx = self.context(target_id)?;
        let cleared = {
            let mut mocks = ctx.mocks.write();
            let n = mocks.len();
            mocks.clear();
            n
        };
        self.teardown_if_idle(&ctx).await?;
        Ok(cleared)
    }

    pub fn list_mocks(&self, target_id: &str) -> Vec<MockEndpoint> {
        self.contexts
            .get(target_id)
            .map(|ctx| ctx.mocks.read().clone())
            .unwrap_or_default()
    }

    pub fn list_pending(
        &self,
        target_id: &str,
        stage: Option<InterceptStage>,
    ) -> Vec<PausedRequest> {
        self.contexts
            .get(target_id)
            .map(|ctx| {
                ctx.pending
                    .iter()
                    .filter(|kv| kv.value().is_pending())
                    .filter(|kv| stage.map(|s| kv.value().stage == s).unwrap_or(true))
                    .map(|kv| kv.value().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resume a parked request, optionally with modifications.
    pub async fn resume(
        &self,
        target_id: &str,
        request_id: &str,
        overrides: Option<Modification>,
    ) -> Result<(), EngineError> {
        let ctx = self.context(target_id)?;
        let record = ctx
            .pending
            .get(request_id)
            .map(|kv| kv.value().clone())
            .ok_or_else(|| EngineError::RequestNotPending(request_id.to_string()))?;
        if !record.is_pending() {
            return Err(EngineError::AlreadyResolved(request_id.to_string()));
        }
        match overrides {
            Some(m) => match record.stage {
                InterceptStage::Request => ctx.forward_modified_request(&record, &m).await,
                InterceptStage::Response => ctx.fulfill_modified_response(&record, &m).await,
            },
            None => ctx.continue_as_is(&record, Disposition::Resumed, None).await,
        }
    }

    /// Fail a parked request with a browser-side error reason.
    pub async fn fail_request(
        &self,
        target_id: &str,
        request_id: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        let ctx = self.context(target_id)?;
        ctx.finish(
            request_id,
            Disposition::Failed,
            None,
            "Fetch.failRequest",
            json!({ "requestId": request_id, "errorReason": reason }),
        )
        .await
    }

    pub async fn start_har(
        &self,
        target_id: &str,
        channel: Arc<CdpChannel>,
    ) -> Result<(), EngineError> {
        let ctx = self.context_or_create(target_id, channel);
        ctx.channel.send("Network.enable", json!({})).await?;
        ctx.har_enabled.store(true, Ordering::Relaxed);
        info!(target: "intercept", target_id, "har recording started");
        Ok(())
    }

    /// Stop recording, drain the buffer, and return the HAR log.
    pub async fn stop_har(
        &self,
        target_id: &str,
        creator: &str,
        version: &str,
    ) -> Result<Value, EngineError> {
        let ctx = self.context(target_id)?;
        ctx.har_enabled.store(false, Ordering::Relaxed);
        let _ = ctx.channel.send("Network.disable", json!({})).await;
        let har = ctx.har.lock().take(creator, version);
        self.teardown_if_idle(&ctx).await?;
        Ok(har)
    }

    /// Current HAR contents without draining; usable mid-recording.
    pub fn har_snapshot(&self, target_id: &str, creator: &str, version: &str) -> Option<Value> {
        self.contexts
            .get(target_id)
            .map(|ctx| ctx.har.lock().snapshot(creator, version))
    }

    pub async fn start_ws_capture(
        &self,
        target_id: &str,
        channel: Arc<CdpChannel>,
    ) -> Result<(), EngineError> {
        if self.ws_captures.contains_key(target_id) {
            return Ok(());
        }
        channel.send("Network.enable", json!({})).await?;
        let log = Arc::new(Mutex::new(WsLog::new()));
        let pump_log = log.clone();
        let mut rx = channel.subscribe();
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.method.starts_with("Network.webSocket") {
                            pump_log.lock().on_event(&event);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.ws_captures
            .insert(target_id.to_string(), WsCaptureHandle { log, pump });
        info!(target: "intercept", target_id, "websocket capture started");
        Ok(())
    }

    pub fn ws_frames(&self, target_id: &str) -> Option<(Vec<WsFrame>, u64)> {
        self.ws_captures.get(target_id).map(|handle| {
            let log = handle.log.lock();
            (log.frames().to_vec(), log.dropped())
        })
    }

    pub fn stop_ws_capture(&self, target_id: &str) -> bool {
        if let Some((_, handle)) = self.ws_captures.remove(target_id) {
            handle.pump.abort();
            self.release_session(target_id, PURPOSE_WS_CAPTURE);
            true
        } else {
            false
        }
    }

    pub fn target_stats(&self, target_id: &str) -> Option<TargetStats> {
        self.contexts.get(target_id).map(|ctx| ctx.stats())
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            contexts: self.contexts.len(),
            ws_capture_targets: self.ws_captures.len(),
            ..Default::default()
        };
        for ctx in self.contexts.iter() {
            let ctx = ctx.value();
            stats.pending += ctx.pending.iter().filter(|kv| kv.value().is_pending()).count();
            stats.rules += ctx.rules.read().len();
            stats.mocks += ctx.mocks.read().len();
            if ctx.har_enabled.load(Ordering::Relaxed) {
                stats.har_targets += 1;
            }
        }
        stats
    }

    pub fn active_targets(&self) -> Vec<String> {
        self.contexts.iter().map(|kv| kv.key().clone()).collect()
    }

    /// Synchronous teardown for instance loss: the transport is gone, so no
    /// drain is possible; just drop every context and capture.
    pub fn clear_all(&self) {
        for ctx in self.contexts.iter() {
            ctx.value().stop_pump();
        }
        self.contexts.clear();
        for capture in self.ws_captures.iter() {
            capture.value().pump.abort();
        }
        self.ws_captures.clear();
        debug!(target: "intercept", "all interception state cleared");
    }
}

impl Default for InterceptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetContext {
    fn start_pump(self: &Arc<Self>) {
        let ctx = self.clone();
        let mut rx = self.channel.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => ctx.on_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "intercept", skipped, "interception pump lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.pump.lock() = Some(handle);
    }

    fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    fn is_idle(&self) -> bool {
        self.modes.read().is_empty()
            && self.mocks.read().is_empty()
            && !self.har_enabled.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TargetStats {
        TargetStats {
            pending: self.pending.iter().filter(|kv| kv.value().is_pending()).count(),
            rules: self.rules.read().len(),
            mocks: self.mocks.read().len(),
            mocked: self.mocked.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Translate the current rule/mock state into CDP Fetch patterns.
    async fn sync_fetch(&self) -> Result<(), EngineError> {
        let patterns = {
            let modes = self.modes.read();
            let mocks = self.mocks.read();
            let mut patterns = Vec::new();
            for p in &modes.request_patterns {
                patterns.push(json!({ "urlPattern": p, "requestStage": "Request" }));
            }
            for p in &modes.response_patterns {
                patterns.push(json!({ "urlPattern": p, "requestStage": "Response" }));
            }
            for m in mocks.iter() {
                patterns.push(json!({ "urlPattern": m.url_pattern, "requestStage": "Request" }));
            }
            patterns
        };

        if patterns.is_empty() {
            self.channel.send("Fetch.disable", json!({})).await?;
        } else {
            self.channel
                .send(
                    "Fetch.enable",
                    json!({ "patterns": patterns, "handleAuthRequests": true }),
                )
                .await?;
        }
        Ok(())
    }

    async fn on_event(self: &Arc<Self>, event: TransportEvent) {
        let method = event.method.clone();
        match method.as_str() {
            "Fetch.requestPaused" => self.on_request_paused(event.params).await,
            "Fetch.authRequired" => self.on_auth_required(event.params).await,
            m if m.starts_with("Network.") => {
                if self.har_enabled.load(Ordering::Relaxed) {
                    self.har.lock().on_event(&event);
                }
            }
            _ => {}
        }
    }

    async fn on_auth_required(&self, params: Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let result = self
            .channel
            .send(
                "Fetch.continueWithAuth",
                json!({
                    "requestId": request_id,
                    "authChallengeResponse": { "response": "Default" }
                }),
            )
            .await;
        if let Err(err) = result {
            warn!(target: "intercept", %err, "continueWithAuth failed");
        }
    }

    async fn on_request_paused(self: &Arc<Self>, params: Value) {
        let Some(mut paused) = PausedRequest::from_event(&params, now_ms()) else {
            return;
        };
        let request_id = paused.request_id.clone();

        let decision = {
            let rules = self.rules.read();
            let mocks = self.mocks.read();
            decide(
                &rules,
                &mocks,
                PauseView {
                    url: &paused.url,
                    method: &paused.method,
                    resource_type: paused.resource_type.as_deref(),
                    stage: paused.stage,
                },
                self.auto_continue.load(Ordering::Relaxed),
            )
        };

        match decision {
            Decision::Mock(idx) => {
                let mock = {
                    let mut mocks = self.mocks.write();
                    match mocks.get_mut(idx) {
                        Some(m) => {
                            m.calls += 1;
                            m.clone()
                        }
                        None => return,
                    }
                };
                paused.rule_id = Some(mock.id.clone());
                self.remember(paused);
                let ctx = self.clone();
                tokio::spawn(async move {
                    if mock.latency_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(mock.latency_ms)).await;
                    }
                    let headers: Vec<Value> = mock
                        .headers
                        .iter()
                        .map(|(name, value)| json!({ "name": name, "value": value }))
                        .collect();
                    let params = json!({
                        "requestId": request_id.as_str(),
                        "responseCode": mock.status,
                        "responseHeaders": headers,
                        "body": BASE64.encode(mock.body.as_bytes()),
                    });
                    let _ = ctx
                        .finish(
                            &request_id,
                            Disposition::Mocked,
                            None,
                            "Fetch.fulfillRequest",
                            params,
                        )
                        .await;
                });
            }
            Decision::Rule(idx) => {
                let rule = {
                    let rules = self.rules.read();
                    match rules.get(idx) {
                        Some(r) => r.clone(),
                        None => return,
                    }
                };
                paused.rule_id = Some(rule.id.clone());
                let record = paused.clone();
                self.remember(paused);
                self.apply_rule(record, rule).await;
            }
            Decision::AutoContinue => {
                let record = paused.clone();
                self.remember(paused);
                let _ = self.continue_as_is(&record, Disposition::Resumed, None).await;
            }
            Decision::Park => {
                self.remember(paused);
                self.arm_watchdog(request_id);
            }
        }
    }

    async fn apply_rule(self: &Arc<Self>, record: PausedRequest, rule: InterceptRule) {
        let request_id = record.request_id.clone();
        match rule.action {
            crate::rules::RuleAction::Fail { reason } => {
                let params = json!({ "requestId": request_id.as_str(), "errorReason": reason });
                let _ = self
                    .finish(
                        &request_id,
                        Disposition::Failed,
                        None,
                        "Fetch.failRequest",
                        params,
                    )
                    .await;
            }
            crate::rules::RuleAction::Block => {
                let params =
                    json!({ "requestId": request_id.as_str(), "errorReason": "BlockedByClient" });
                let _ = self
                    .finish(
                        &request_id,
                        Disposition::Failed,
                        None,
                        "Fetch.failRequest",
                        params,
                    )
                    .await;
            }
            crate::rules::RuleAction::Delay { ms } => {
                let ctx = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = ctx.continue_as_is(&record, Disposition::Resumed, None).await;
                });
            }
            crate::rules::RuleAction::Modify(modification) => {
                let ctx = self.clone();
                tokio::spawn(async move {
                    if let Some(ms) = modification.latency_ms {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                    let result = match record.stage {
                        InterceptStage::Request => {
                            ctx.forward_modified_request(&record, &modification).await
                        }
                        InterceptStage::Response => {
                            ctx.fulfill_modified_response(&record, &modification).await
                        }
                    };
                    if let Err(err) = result {
                        warn!(target: "intercept", %err, "modification failed; resuming as-is");
                        let _ = ctx
                            .continue_as_is(&record, Disposition::Resumed, Some(err.to_string()))
                            .await;
                    }
                });
            }
            crate::rules::RuleAction::Observe => {
                // decide() folds observe into AutoContinue/Park
                self.arm_watchdog(request_id);
            }
        }
    }

    fn arm_watchdog(self: &Arc<Self>, request_id: String) {
        let ctx = self.clone();
        let timeout = Duration::from_millis(ctx.pause_timeout_ms.load(Ordering::Relaxed));
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let still_pending = ctx
                .pending
                .get(&request_id)
                .map(|kv| kv.value().is_pending())
                .unwrap_or(false);
            if !still_pending {
                return;
            }
            let record = match ctx.pending.get(&request_id) {
                Some(kv) => kv.value().clone(),
                None => return,
            };
            warn!(
                target: "intercept",
                request_id = %request_id,
                url = %record.url,
                "paused request aged past its deadline; resuming as-is"
            );
            let _ = ctx
                .continue_as_is(
                    &record,
                    Disposition::TimedOut,
                    Some(format!("auto-resumed after {}ms", timeout.as_millis())),
                )
                .await;
        });
    }

    async fn continue_as_is(
        &self,
        record: &PausedRequest,
        disposition: Disposition,
        warning: Option<String>,
    ) -> Result<(), EngineError> {
        let (method, params) = match record.stage {
            InterceptStage::Request => (
                "Fetch.continueRequest",
                json!({ "requestId": record.request_id }),
            ),
            InterceptStage::Response => (
                "Fetch.continueResponse",
                json!({ "requestId": record.request_id }),
            ),
        };
        self.finish(&record.request_id, disposition, warning, method, params)
            .await
    }

    async fn forward_modified_request(
        &self,
        record: &PausedRequest,
        modification: &Modification,
    ) -> Result<(), EngineError> {
        let mut headers = record.headers.clone();
        modification.headers.apply(&mut headers);

        let mut params = json!({
            "requestId": record.request_id,
            "headers": headers
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect::<Vec<_>>(),
        });
        if let Some(method) = &modification.method {
            params["method"] = json!(method);
        }
        if let Some(post_data) = &modification.post_data {
            params["postData"] = json!(BASE64.encode(post_data.as_bytes()));
        }

        self.finish(
            &record.request_id,
            Disposition::Modified,
            None,
            "Fetch.continueRequest",
            params,
        )
        .await
    }

    /// Response-stage modification. The body is only fetched when the caller
    /// actually changes it; `Fetch.getResponseBody` is legal solely at the
    /// response stage and only while the pause is live.
    async fn fulfill_modified_response(
        &self,
        record: &PausedRequest,
        modification: &Modification,
    ) -> Result<(), EngineError> {
        let mut headers = record.response_headers.clone();
        modification.headers.apply(&mut headers);
        let status = modification
            .status
            .map(i64::from)
            .or(record.response_status)
            .unwrap_or(200);

        let changes_body =
            modification.body.is_some() || !modification.body_replacements.is_empty();

        if !changes_body {
            let mut params = json!({ "requestId": record.request_id, "responseCode": status });
            if !modification.headers.is_empty() {
                params["responseHeaders"] = header_entries(&headers);
            }
            return self
                .finish(
                    &record.request_id,
                    Disposition::Modified,
                    None,
                    "Fetch.continueResponse",
                    params,
                )
                .await;
        }

        let body = match &modification.body {
            Some(body) => body.clone(),
            None => {
                let original = self
                    .channel
                    .send(
                        "Fetch.getResponseBody",
                        json!({ "requestId": record.request_id }),
                    )
                    .await?;
                let raw = original
                    .get("body")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let decoded = if original
                    .get("base64Encoded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    String::from_utf8_lossy(&BASE64.decode(raw).unwrap_or_default()).into_owned()
                } else {
                    raw.to_string()
                };
                let mut body = decoded;
                for (needle, replacement) in &modification.body_replacements {
                    body = body.replace(needle, replacement);
                }
                body
            }
        };

        // the body is re-encoded; stale framing headers would corrupt it
        headers.retain(|(name, _)| {
            !name.eq_ignore_ascii_case("content-length")
                && !name.eq_ignore_ascii_case("content-encoding")
        });

        self.finish(
            &record.request_id,
            Disposition::Modified,
            None,
            "Fetch.fulfillRequest",
            json!({
                "requestId": record.request_id,
                "responseCode": status,
                "responseHeaders": header_entries(&headers),
                "body": BASE64.encode(body.as_bytes()),
            }),
        )
        .await
    }

    /// Claim the terminal disposition, then issue the terminal CDP call.
    async fn finish(
        &self,
        request_id: &str,
        disposition: Disposition,
        warning: Option<String>,
        method: &str,
        params: Value,
    ) -> Result<(), EngineError> {
        {
            let mut entry = self
                .pending
                .get_mut(request_id)
                .ok_or_else(|| EngineError::RequestNotPending(request_id.to_string()))?;
            if !entry.claim(disposition) {
                return Err(EngineError::AlreadyResolved(request_id.to_string()));
            }
            if warning.is_some() {
                entry.warning = warning;
            }
        }

        let calls = {
            let mut entry = self
                .terminal_calls
                .entry(request_id.to_string())
                .or_insert(0);
            *entry += 1;
            *entry
        };
        if calls > 1 {
            // the claim above makes this unreachable; it would mean a double
            // terminal call and a protocol violation
            warn!(target: "intercept", request_id, calls, "duplicate terminal call detected");
        }

        let counter = match disposition {
            Disposition::Mocked => &self.mocked,
            Disposition::Modified => &self.modified,
            Disposition::Failed => &self.failed,
            Disposition::TimedOut => &self.timed_out,
            _ => &self.resumed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match self.channel.send(method, params).await {
            Ok(_) => Ok(()),
            Err(WireError::Cdp { code, message }) => {
                // the browser may have dropped the pause (tab closed); log, not fatal
                debug!(target: "intercept", request_id, code, %message, "terminal call rejected");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resume every still-pending pause, optionally limited to one stage.
    async fn drain(&self, stage: Option<InterceptStage>) -> usize {
        let parked: Vec<PausedRequest> = self
            .pending
            .iter()
            .filter(|kv| kv.value().is_pending())
            .filter(|kv| stage.map(|s| kv.value().stage == s).unwrap_or(true))
            .map(|kv| kv.value().clone())
            .collect();
        let mut drained = 0;
        for record in parked {
            if self
                .continue_as_is(&record, Disposition::Resumed, Some("drained on disable".into()))
                .await
                .is_ok()
            {
                drained += 1;
            }
        }
        drained
    }

    fn remember(&self, paused: PausedRequest) {
        let id = paused.request_id.clone();
        self.pending.insert(id.clone(), paused);
        let mut order = self.arrival_order.lock();
        order.push_back(id);
        while order.len() > MAX_TRACKED_REQUESTS {
            let Some(front) = order.front().cloned() else { break };
            let resolved = self
                .pending
                .get(&front)
                .map(|kv| !kv.value().is_pending())
                .unwrap_or(true);
            if !resolved {
                break;
            }
            order.pop_front();
            self.pending.remove(&front);
            self.terminal_calls.remove(&front);
        }
    }
}

fn header_entries(headers: &[(String, String)]) -> Value {
    Value::Array(
        headers
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect(),
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
