//! Lifecycle and visibility tools: launch, close, status, stealth, advanced
//! toggle.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use browser_host::LaunchOptions;
use serde_json::{json, Value};
use tracing::warn;

use super::{bool_arg, str_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

pub fn launch_with_profile(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let opts = LaunchOptions {
            profile: str_arg(&args, "profile").map(String::from),
            chrome_path: str_arg(&args, "chrome_path").map(Into::into),
            user_data_dir: str_arg(&args, "user_data_dir").map(Into::into),
            force: bool_arg(&args, "force"),
        };

        let report = state.host.launch(opts).await?;

        // stealth rides along automatically once the launch verifies
        let applied = apply_stealth_everywhere(&state, false).await;

        Ok(json!({
            "port": report.port,
            "attached_existing": report.attached_existing,
            "shadow_profile": report.shadow_profile,
            "pid": report.pid,
            "stealth_applied_to": applied,
        }))
    })
}

pub fn close_browser(state: Arc<AppState>, _args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let killed = state.host.close().await;
        Ok(json!({ "closed": true, "killed_managed_process": killed }))
    })
}

pub fn status(state: Arc<AppState>, _args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let host = state.host.status().await;
        let engine = state.engine.stats();
        Ok(json!({
            "server_version": env!("CARGO_PKG_VERSION"),
            "connected": host.connected,
            "port": host.port,
            "managed_pid": host.managed_pid,
            "shadow_profile": host.shadow_profile,
            "stealth_applied": host.stealth_applied,
            "pages": host.page_count,
            "targets": host.target_count,
            "persistent_sessions": host.persistent_sessions,
            "interception": engine,
            "advanced_tools_enabled": state.advanced_enabled(),
        }))
    })
}

pub fn enable_advanced_tools(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let enabled = args
            .get("enabled")
            .and_then(Value::as_bool)
            .ok_or_else(|| ToolError::invalid_args("missing required argument: enabled"))?;
        let was = state.advanced_tools.swap(enabled, Ordering::Relaxed);
        Ok(json!({
            "advanced_tools_enabled": enabled,
            "changed": was != enabled,
        }))
    })
}

pub fn apply_stealth_script(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let force = bool_arg(&args, "force");
        let applied = apply_stealth_everywhere(&state, force).await;
        Ok(json!({ "applied_to": applied, "seed_stable": true }))
    })
}

/// Install the stealth patch on every open page. Best-effort per page; the
/// count of fresh installations is returned.
pub(crate) async fn apply_stealth_everywhere(state: &AppState, force: bool) -> usize {
    let seed = state.connection_seed();
    let mut applied = 0;
    for page in state.host.registry().pages() {
        match state.host.sessions().ephemeral(&page.id).await {
            Ok(channel) => match state.stealth.apply(&page.id, &channel, seed, force).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(target: "stealth", %err, target_id = %page.id, "stealth install failed")
                }
            },
            Err(err) => {
                warn!(target: "stealth", %err, target_id = %page.id, "no session for stealth install")
            }
        }
    }
    if applied > 0 {
        state.host.mark_stealth_applied();
    }
    applied
}
