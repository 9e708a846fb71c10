//! Per-tool CDP recipes. Each handler is a thin sequence of CDP commands on
//! a session checked out from the host; everything heavy lives below.

pub mod browser;
pub mod har;
pub mod inject;
pub mod mocks;
pub mod navigation;
pub mod network;
pub mod session_io;
pub mod tabs;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use browser_host::TargetRecord;
use cdp_wire::CdpChannel;
use serde_json::{json, Value};

use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
pub type Handler = fn(Arc<AppState>, JsonMap) -> HandlerFuture;

pub(crate) fn str_arg<'a>(args: &'a JsonMap, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub(crate) fn bool_arg(args: &JsonMap, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn u64_arg(args: &JsonMap, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

pub(crate) fn string_list(args: &JsonMap, name: &str) -> Vec<String> {
    args.get(name)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn string_pairs(args: &JsonMap, name: &str) -> Vec<(String, String)> {
    args.get(name)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve the page a tool call is aimed at (explicit `target_id` or the
/// active tab).
pub(crate) fn resolve_page(state: &AppState, args: &JsonMap) -> Result<TargetRecord, ToolError> {
    let explicit = str_arg(args, "target_id");
    Ok(state.host.registry().resolve(explicit)?)
}

/// Resolve the page and check out an ephemeral session for it.
pub(crate) async fn page_channel(
    state: &AppState,
    args: &JsonMap,
) -> Result<(TargetRecord, Arc<CdpChannel>), ToolError> {
    let record = resolve_page(state, args)?;
    let channel = state.host.sessions().ephemeral(&record.id).await?;
    Ok((record, channel))
}

/// `Runtime.evaluate` with by-value results; page exceptions surface as
/// handler errors.
pub(crate) async fn evaluate(
    channel: &Arc<CdpChannel>,
    expression: &str,
) -> Result<Value, ToolError> {
    let reply = channel
        .send(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await?;

    if let Some(details) = reply.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("script threw");
        return Err(ToolError::raised(format!("page script failed: {text}")));
    }

    Ok(reply
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// JS string literal for interpolation into evaluate expressions.
pub(crate) fn js_string(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| "\"\"".to_string())
}

/// Small randomized pause between synthetic input events, paced from the
/// connection seed so a replayed seed reproduces the same rhythm.
pub(crate) async fn human_pause(state: &AppState, min_ms: u64, max_ms: u64) {
    let ms = state.next_pace_delay(min_ms, max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes_and_backslashes() {
        assert_eq!(js_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(js_string("#id"), "\"#id\"");
    }

    #[test]
    fn string_pairs_drops_non_string_values() {
        let args = json!({ "headers": { "A": "1", "B": 2 } })
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(
            string_pairs(&args, "headers"),
            vec![("A".to_string(), "1".to_string())]
        );
    }
}
