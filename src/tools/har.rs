//! HAR recording tools.

use std::sync::Arc;

use intercept_engine::PURPOSE_INTERCEPT;
use serde_json::json;

use super::{resolve_page, str_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

const CREATOR: &str = "chromehand";

pub fn start_har_recording(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let channel = state
            .host
            .sessions()
            .persistent(&record.id, PURPOSE_INTERCEPT)
            .await?;
        state.engine.start_har(&record.id, channel).await?;
        Ok(json!({ "target_id": record.id, "recording": true }))
    })
}

pub fn stop_har_recording(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let har = state
            .engine
            .stop_har(&record.id, CREATOR, env!("CARGO_PKG_VERSION"))
            .await?;
        let entries = har["log"]["entries"].as_array().map(Vec::len).unwrap_or(0);
        Ok(json!({ "target_id": record.id, "entries": entries, "har": har }))
    })
}

/// Write the current HAR buffer to a file without stopping the recording.
pub fn export_har_file(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let path = str_arg(&args, "path")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: path"))?
            .to_string();
        let record = resolve_page(&state, &args)?;
        let har = state
            .engine
            .har_snapshot(&record.id, CREATOR, env!("CARGO_PKG_VERSION"))
            .ok_or_else(|| {
                ToolError::invalid_args("no HAR recording on this target; call start_har_recording")
            })?;
        let entries = har["log"]["entries"].as_array().map(Vec::len).unwrap_or(0);
        let body: String = serde_json::to_string_pretty(&har)
            .map_err(|err| ToolError::raised(format!("har serialization failed: {err}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|err| ToolError::raised(format!("could not write {path}: {err}")))?;
        Ok(json!({ "path": path, "entries": entries }))
    })
}
