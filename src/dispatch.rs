//! Tool dispatcher: validation, lazy connection, deadlines, error shaping.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::catalog;
use crate::errors::{ErrorKind, ToolError};
use crate::schema::{self, JsonMap};
use crate::state::AppState;

/// Hard cap on a caller-supplied deadline override.
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Run one tool call to a structured value. Never panics, never returns a
/// transport-level error: every outcome is a JSON object with `success`.
pub async fn dispatch(state: Arc<AppState>, name: &str, raw_args: Option<JsonMap>) -> Value {
    let Some(spec) = catalog::find(name) else {
        return error_value(
            name,
            ToolError::invalid_args(format!("unknown tool: {name}")),
        );
    };

    // cooperative scheduling: one invocation at a time
    let _gate = state.tool_gate.lock().await;

    if spec.requires_browser {
        if let Err(err) = state.host.ensure_connected().await {
            return error_value(name, err.into());
        }
    }

    let mut raw = raw_args.unwrap_or_default();
    let timeout_override = match take_timeout_override(&mut raw) {
        Ok(t) => t,
        Err(err) => return error_value(name, err),
    };

    let args = match schema::validate(&spec.args, &raw) {
        Ok(args) => args,
        Err(err) => return error_value(name, err),
    };

    let deadline = Duration::from_millis(timeout_override.unwrap_or(spec.timeout_ms));
    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(deadline, (spec.handler)(state.clone(), args)).await;

    match outcome {
        Ok(Ok(mut value)) => {
            if let Some(object) = value.as_object_mut() {
                object
                    .entry("success".to_string())
                    .or_insert(Value::Bool(true));
            }
            info!(
                target: "dispatcher",
                tool = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool completed"
            );
            value
        }
        Ok(Err(err)) => {
            warn!(target: "dispatcher", tool = name, kind = err.kind.as_str(), error = %err.message, "tool failed");
            error_value(name, err)
        }
        Err(_) => {
            // the handler future is dropped; shared state is left as-is
            warn!(target: "dispatcher", tool = name, ?deadline, "tool deadline expired");
            error_value(
                name,
                ToolError::new(
                    ErrorKind::ToolTimeout,
                    format!("tool did not finish within {}ms", deadline.as_millis()),
                )
                .with_hint("Pass timeout_ms to allow more time."),
            )
        }
    }
}

fn take_timeout_override(raw: &mut JsonMap) -> Result<Option<u64>, ToolError> {
    let Some(value) = raw.remove("timeout_ms") else {
        return Ok(None);
    };
    match value.as_u64() {
        Some(ms) if (1..=MAX_TIMEOUT_MS).contains(&ms) => Ok(Some(ms)),
        _ => Err(ToolError::invalid_args(format!(
            "timeout_ms must be an integer between 1 and {MAX_TIMEOUT_MS}"
        ))),
    }
}

fn error_value(tool: &str, err: ToolError) -> Value {
    let mut value = json!({
        "success": false,
        "error": err.message,
        "kind": err.kind.as_str(),
        "tool": tool,
    });
    if let Some(hint) = err.hint {
        value["hint"] = json!(hint);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tools_yield_a_structured_error() {
        let state = AppState::new(19_222);
        let value = dispatch(state, "no_such_tool", None).await;
        assert_eq!(value["success"], false);
        assert_eq!(value["kind"], "invalid-arguments");
        assert_eq!(value["tool"], "no_such_tool");
    }

    #[tokio::test]
    async fn connection_requiring_tools_refuse_without_a_browser() {
        // nothing listens on this port, so ensure_connected must refuse
        let state = AppState::new(19_223);
        let value = dispatch(
            state,
            "manage_tabs",
            Some(
                json!({ "action": "list" })
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        )
        .await;
        assert_eq!(value["success"], false);
        assert_eq!(value["kind"], "not-connected");
        assert!(value["hint"]
            .as_str()
            .unwrap()
            .contains("launch_with_profile"));
    }

    #[tokio::test]
    async fn unknown_arguments_are_invalid() {
        let state = AppState::new(19_224);
        let value = dispatch(
            state,
            "status",
            Some(json!({ "bogus": true }).as_object().cloned().unwrap()),
        )
        .await;
        assert_eq!(value["kind"], "invalid-arguments");
        assert!(value["error"].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn bad_timeout_override_is_invalid_arguments() {
        let state = AppState::new(19_225);
        let value = dispatch(
            state,
            "status",
            Some(json!({ "timeout_ms": 0 }).as_object().cloned().unwrap()),
        )
        .await;
        assert_eq!(value["kind"], "invalid-arguments");
    }

    #[tokio::test]
    async fn status_runs_without_a_browser() {
        let state = AppState::new(19_226);
        let value = dispatch(state, "status", None).await;
        assert_eq!(value["success"], true);
        assert_eq!(value["connected"], false);
        assert_eq!(value["port"], 19_226);
    }
}
