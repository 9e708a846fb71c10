//! WebSocket frame capture tools.

use std::sync::Arc;

use intercept_engine::PURPOSE_WS_CAPTURE;
use serde_json::json;

use super::{resolve_page, HandlerFuture};
use crate::schema::JsonMap;
use crate::state::AppState;

pub fn start_websocket_capture(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let channel = state
            .host
            .sessions()
            .persistent(&record.id, PURPOSE_WS_CAPTURE)
            .await?;
        state.engine.start_ws_capture(&record.id, channel).await?;
        Ok(json!({ "target_id": record.id, "capturing": true }))
    })
}

pub fn stop_websocket_capture(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let stopped = state.engine.stop_ws_capture(&record.id);
        Ok(json!({ "target_id": record.id, "stopped": stopped }))
    })
}

pub fn list_websocket_frames(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let (frames, dropped) = state.engine.ws_frames(&record.id).unwrap_or_default();
        Ok(json!({
            "target_id": record.id,
            "count": frames.len(),
            "dropped": dropped,
            "frames": frames,
        }))
    })
}
