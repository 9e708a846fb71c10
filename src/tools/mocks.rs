//! Mock endpoint tools.

use std::sync::Arc;

use intercept_engine::{MockEndpoint, PURPOSE_INTERCEPT};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{resolve_page, str_arg, string_pairs, u64_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

pub fn create_mock_endpoint(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let url_pattern = str_arg(&args, "url_pattern")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: url_pattern"))?
            .to_string();
        let record = resolve_page(&state, &args)?;
        let channel = state
            .host
            .sessions()
            .persistent(&record.id, PURPOSE_INTERCEPT)
            .await?;

        let mock = MockEndpoint {
            id: Uuid::new_v4().to_string(),
            url_pattern: url_pattern.clone(),
            method: str_arg(&args, "method").map(String::from),
            status: args
                .get("status_code")
                .and_then(Value::as_u64)
                .unwrap_or(200) as u16,
            headers: {
                let mut headers = string_pairs(&args, "headers");
                if !headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                headers
            },
            body: str_arg(&args, "response_body").unwrap_or_default().to_string(),
            latency_ms: u64_arg(&args, "latency_ms").unwrap_or(0),
            calls: 0,
        };

        let mock_id = state.engine.add_mock(&record.id, channel, mock).await?;
        Ok(json!({
            "mock_id": mock_id,
            "target_id": record.id,
            "url_pattern": url_pattern,
        }))
    })
}

pub fn delete_mock_endpoint(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let mock_id = str_arg(&args, "mock_id")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: mock_id"))?;
        let record = resolve_page(&state, &args)?;
        let deleted = state.engine.delete_mock(&record.id, mock_id).await?;
        Ok(json!({ "deleted": deleted, "mock_id": mock_id }))
    })
}

pub fn clear_all_mocks(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        match state.engine.clear_mocks(&record.id).await {
            Ok(cleared) => Ok(json!({ "cleared": cleared })),
            Err(intercept_engine::EngineError::NoContext(_)) => Ok(json!({ "cleared": 0 })),
            Err(err) => Err(err.into()),
        }
    })
}

pub fn list_mock_endpoints(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let mocks = state.engine.list_mocks(&record.id);
        Ok(json!({
            "target_id": record.id,
            "count": mocks.len(),
            "mocks": mocks,
        }))
    })
}
