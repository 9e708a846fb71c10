//! Interception tools built on the engine.

use std::sync::Arc;
use std::time::Duration;

use intercept_engine::{
    HeaderPatch, InterceptRule, InterceptStage, Modification, RuleAction, PURPOSE_INTERCEPT,
};
use serde_json::{json, Value};

use super::{resolve_page, str_arg, string_list, string_pairs, u64_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

async fn enable_stage(
    state: &AppState,
    args: &JsonMap,
    stage: InterceptStage,
) -> Result<Value, ToolError> {
    let record = resolve_page(state, args)?;
    let channel = state
        .host
        .sessions()
        .persistent(&record.id, PURPOSE_INTERCEPT)
        .await?;

    let mut patterns = string_list(args, "patterns");
    if patterns.is_empty() {
        patterns.push("*".to_string());
    }
    let auto_continue = args
        .get("auto_continue")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let pause_timeout = u64_arg(args, "pause_timeout_ms");

    state
        .engine
        .enable(
            &record.id,
            channel,
            stage,
            patterns.clone(),
            auto_continue,
            pause_timeout,
        )
        .await?;

    Ok(json!({
        "target_id": record.id,
        "stage": match stage { InterceptStage::Request => "request", InterceptStage::Response => "response" },
        "patterns": patterns,
        "auto_continue": auto_continue,
    }))
}

async fn disable_stage(
    state: &AppState,
    args: &JsonMap,
    stage: InterceptStage,
) -> Result<Value, ToolError> {
    let record = resolve_page(state, args)?;
    match state.engine.disable(&record.id, Some(stage)).await {
        Ok(drained) => Ok(json!({ "target_id": record.id, "drained": drained })),
        Err(intercept_engine::EngineError::NoContext(_)) => {
            Ok(json!({ "target_id": record.id, "drained": 0, "already_disabled": true }))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn enable_request_interception(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move { enable_stage(&state, &args, InterceptStage::Request).await })
}

pub fn enable_response_interception(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move { enable_stage(&state, &args, InterceptStage::Response).await })
}

pub fn disable_request_interception(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move { disable_stage(&state, &args, InterceptStage::Request).await })
}

pub fn disable_response_interception(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move { disable_stage(&state, &args, InterceptStage::Response).await })
}

fn list_stage(state: &AppState, args: &JsonMap, stage: InterceptStage) -> Result<Value, ToolError> {
    let record = resolve_page(state, args)?;
    let pending = state.engine.list_pending(&record.id, Some(stage));
    Ok(json!({
        "target_id": record.id,
        "count": pending.len(),
        "requests": pending,
    }))
}

pub fn list_intercepted_requests(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move { list_stage(&state, &args, InterceptStage::Request) })
}

pub fn list_intercepted_responses(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move { list_stage(&state, &args, InterceptStage::Response) })
}

fn modification_from_args(args: &JsonMap) -> Modification {
    Modification {
        headers: HeaderPatch {
            add: string_pairs(args, "add_headers"),
            remove: string_list(args, "remove_headers"),
        },
        method: str_arg(args, "method").map(String::from),
        post_data: str_arg(args, "post_data").map(String::from),
        status: args
            .get("status")
            .and_then(Value::as_u64)
            .map(|s| s as u16),
        body: str_arg(args, "body").map(String::from),
        body_replacements: string_pairs(args, "body_replacements"),
        latency_ms: u64_arg(args, "latency_ms"),
    }
}

pub fn modify_intercepted_request(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let request_id = str_arg(&args, "request_id")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: request_id"))?;
        let modification = modification_from_args(&args);
        state
            .engine
            .resume(&record.id, request_id, Some(modification))
            .await?;
        Ok(json!({ "request_id": request_id, "forwarded": true }))
    })
}

pub fn modify_intercepted_response(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let request_id = str_arg(&args, "request_id")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: request_id"))?;
        let modification = modification_from_args(&args);
        state
            .engine
            .resume(&record.id, request_id, Some(modification))
            .await?;
        Ok(json!({ "request_id": request_id, "fulfilled": true }))
    })
}

pub fn resume_intercepted_request(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let record = resolve_page(&state, &args)?;
        let request_id = str_arg(&args, "request_id")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: request_id"))?;
        match str_arg(&args, "fail_reason") {
            Some(reason) => {
                state
                    .engine
                    .fail_request(&record.id, request_id, reason)
                    .await?;
                Ok(json!({ "request_id": request_id, "failed": reason }))
            }
            None => {
                state.engine.resume(&record.id, request_id, None).await?;
                Ok(json!({ "request_id": request_id, "resumed": true }))
            }
        }
    })
}

/// Convenience flow: enable request-stage modification for a pattern, apply a
/// header patch to everything that matches, optionally click something to
/// trigger traffic, and report what got modified.
pub fn intercept_and_modify_traffic(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let pattern = str_arg(&args, "pattern")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: pattern"))?
            .to_string();
        let record = resolve_page(&state, &args)?;
        let channel = state
            .host
            .sessions()
            .persistent(&record.id, PURPOSE_INTERCEPT)
            .await?;

        state
            .engine
            .enable(
                &record.id,
                channel,
                InterceptStage::Request,
                vec![pattern.clone()],
                true,
                None,
            )
            .await?;

        let modification = modification_from_args(&args);
        let mut rule = InterceptRule::new(
            &pattern,
            InterceptStage::Request,
            RuleAction::Modify(modification),
        );
        rule.method = str_arg(&args, "method_filter").map(String::from);
        let rule_id = state.engine.add_rule(&record.id, rule)?;

        let before = state
            .engine
            .target_stats(&record.id)
            .map(|s| s.modified)
            .unwrap_or(0);

        if let (Some("click"), Some(selector)) =
            (str_arg(&args, "action"), str_arg(&args, "selector"))
        {
            let mut click_args = JsonMap::new();
            click_args.insert("action".into(), json!("click"));
            click_args.insert("selector".into(), json!(selector));
            click_args.insert("target_id".into(), json!(record.id));
            super::navigation::browser_action(state.clone(), click_args).await?;
        }

        let settle_ms = u64_arg(&args, "settle_ms").unwrap_or(2_000);
        tokio::time::sleep(Duration::from_millis(settle_ms)).await;

        let after = state
            .engine
            .target_stats(&record.id)
            .map(|s| s.modified)
            .unwrap_or(0);

        Ok(json!({
            "target_id": record.id,
            "rule_id": rule_id,
            "pattern": pattern,
            "modified_requests": after.saturating_sub(before),
        }))
    })
}
