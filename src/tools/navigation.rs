//! `browser_action`: navigation and DOM interaction recipes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cdp_wire::CdpChannel;
use serde_json::{json, Value};

use super::{
    evaluate, human_pause, js_string, page_channel, str_arg, u64_arg, HandlerFuture,
};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

pub const ACTIONS: &[&str] = &[
    "navigate",
    "go_back",
    "go_forward",
    "reload",
    "click",
    "type_text",
    "press_key",
    "scroll",
    "screenshot",
    "evaluate",
    "wait_for_selector",
];

pub fn browser_action(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let action = str_arg(&args, "action")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: action"))?
            .to_string();
        let (record, channel) = page_channel(&state, &args).await?;

        match action.as_str() {
            "navigate" => {
                let url = require(&args, "url", &action)?;
                navigate(&channel, &url).await
            }
            "go_back" => history_step(&channel, -1).await,
            "go_forward" => history_step(&channel, 1).await,
            "reload" => {
                channel.send("Page.reload", json!({})).await?;
                Ok(json!({ "reloaded": true }))
            }
            "click" => {
                let selector = require(&args, "selector", &action)?;
                click(&state, &channel, &selector).await
            }
            "type_text" => {
                let selector = require(&args, "selector", &action)?;
                let text = require(&args, "text", &action)?;
                type_text(&state, &channel, &selector, &text).await
            }
            "press_key" => {
                let key = require(&args, "key", &action)?;
                press_key(&state, &channel, &key).await
            }
            "scroll" => {
                let dy = args.get("amount").and_then(Value::as_i64).unwrap_or(600);
                let dy = match str_arg(&args, "direction") {
                    Some("up") => -dy,
                    _ => dy,
                };
                evaluate(&channel, &format!("window.scrollBy(0, {dy})")).await?;
                Ok(json!({ "scrolled_by": dy }))
            }
            "screenshot" => {
                let reply = channel
                    .send("Page.captureScreenshot", json!({ "format": "png" }))
                    .await?;
                let data = reply
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::raised("screenshot returned no data"))?;
                Ok(json!({ "format": "png", "data_base64": data }))
            }
            "evaluate" => {
                let script = require(&args, "script", &action)?;
                let value = evaluate(&channel, &script).await?;
                Ok(json!({ "result": value }))
            }
            "wait_for_selector" => {
                let selector = require(&args, "selector", &action)?;
                let wait_ms = u64_arg(&args, "wait_ms").unwrap_or(5_000);
                wait_for_selector(&channel, &selector, wait_ms).await
            }
            other => Err(ToolError::invalid_args(format!(
                "unsupported action: {other}"
            ))),
        }
        .map(|mut value| {
            if let Some(object) = value.as_object_mut() {
                object.insert("target_id".into(), json!(record.id));
            }
            value
        })
    })
}

fn require(args: &JsonMap, name: &str, action: &str) -> Result<String, ToolError> {
    str_arg(args, name)
        .map(String::from)
        .ok_or_else(|| ToolError::invalid_args(format!("action {action:?} requires {name}")))
}

async fn navigate(channel: &Arc<CdpChannel>, url: &str) -> Result<Value, ToolError> {
    channel.send("Page.enable", json!({})).await?;
    let mut events = channel.subscribe();

    let reply = channel.send("Page.navigate", json!({ "url": url })).await?;
    if let Some(error_text) = reply.get("errorText").and_then(Value::as_str) {
        if !error_text.is_empty() {
            return Err(ToolError::raised(format!("navigation failed: {error_text}")));
        }
    }

    // best-effort wait for the load event; slow pages report loaded=false
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut loaded = false;
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if event.method == "Page.loadEventFired" => {
                loaded = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }

    let current = evaluate(channel, "window.location.href").await?;
    Ok(json!({ "url": current, "loaded": loaded }))
}

async fn history_step(channel: &Arc<CdpChannel>, step: i64) -> Result<Value, ToolError> {
    let history = channel
        .send("Page.getNavigationHistory", json!({}))
        .await?;
    let current = history
        .get("currentIndex")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let entries = history
        .get("entries")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let wanted = current + step;
    if wanted < 0 || wanted as usize >= entries.len() {
        return Ok(json!({ "moved": false }));
    }
    let entry_id = entries[wanted as usize]
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolError::raised("history entry without id"))?;
    channel
        .send(
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await?;
    Ok(json!({ "moved": true }))
}

/// Trusted-input click: scroll the element into view, then dispatch real
/// mouse events at its center with seed-paced gaps.
async fn click(
    state: &AppState,
    channel: &Arc<CdpChannel>,
    selector: &str,
) -> Result<Value, ToolError> {
    let expr = format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
         el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
         const r = el.getBoundingClientRect(); \
         return {{ x: r.x + r.width / 2, y: r.y + r.height / 2 }}; }})()",
        sel = js_string(selector)
    );
    let point = evaluate(channel, &expr).await?;
    let (Some(x), Some(y)) = (
        point.get("x").and_then(Value::as_f64),
        point.get("y").and_then(Value::as_f64),
    ) else {
        return Err(ToolError::selector_not_found(selector));
    };

    channel
        .send(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseMoved", "x": x, "y": y }),
        )
        .await?;
    human_pause(state, 30, 120).await;
    channel
        .send(
            "Input.dispatchMouseEvent",
            json!({ "type": "mousePressed", "x": x, "y": y, "button": "left", "clickCount": 1 }),
        )
        .await?;
    human_pause(state, 20, 90).await;
    channel
        .send(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseReleased", "x": x, "y": y, "button": "left", "clickCount": 1 }),
        )
        .await?;

    Ok(json!({ "clicked": true, "x": x, "y": y }))
}

async fn type_text(
    state: &AppState,
    channel: &Arc<CdpChannel>,
    selector: &str,
    text: &str,
) -> Result<Value, ToolError> {
    let expr = format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
         el.focus(); return true; }})()",
        sel = js_string(selector)
    );
    if evaluate(channel, &expr).await? != Value::Bool(true) {
        return Err(ToolError::selector_not_found(selector));
    }

    // per-character pacing for short inputs, bulk insert for the tail
    let mut typed = 0usize;
    for ch in text.chars() {
        if typed >= 40 {
            break;
        }
        channel
            .send("Input.insertText", json!({ "text": ch.to_string() }))
            .await?;
        human_pause(state, 20, 60).await;
        typed += 1;
    }
    let rest: String = text.chars().skip(typed).collect();
    if !rest.is_empty() {
        channel
            .send("Input.insertText", json!({ "text": rest }))
            .await?;
    }

    Ok(json!({ "typed_chars": text.chars().count() }))
}

fn key_code(key: &str) -> i64 {
    match key {
        "Enter" => 13,
        "Tab" => 9,
        "Escape" => 27,
        "Backspace" => 8,
        "Delete" => 46,
        "ArrowUp" => 38,
        "ArrowDown" => 40,
        "ArrowLeft" => 37,
        "ArrowRight" => 39,
        "Home" => 36,
        "End" => 35,
        "PageUp" => 33,
        "PageDown" => 34,
        other => other
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase() as i64)
            .unwrap_or(0),
    }
}

async fn press_key(
    state: &AppState,
    channel: &Arc<CdpChannel>,
    key: &str,
) -> Result<Value, ToolError> {
    let code = key_code(key);
    channel
        .send(
            "Input.dispatchKeyEvent",
            json!({ "type": "keyDown", "key": key, "code": key, "windowsVirtualKeyCode": code }),
        )
        .await?;
    human_pause(state, 15, 60).await;
    channel
        .send(
            "Input.dispatchKeyEvent",
            json!({ "type": "keyUp", "key": key, "code": key, "windowsVirtualKeyCode": code }),
        )
        .await?;
    Ok(json!({ "pressed": key }))
}

async fn wait_for_selector(
    channel: &Arc<CdpChannel>,
    selector: &str,
    wait_ms: u64,
) -> Result<Value, ToolError> {
    let expr = format!(
        "!!document.querySelector({sel})",
        sel = js_string(selector)
    );
    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    loop {
        if evaluate(channel, &expr).await? == Value::Bool(true) {
            return Ok(json!({ "found": true }));
        }
        if Instant::now() >= deadline {
            return Err(ToolError::selector_not_found(selector)
                .with_hint(format!("waited {wait_ms}ms")));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_codes_cover_navigation_keys() {
        assert_eq!(key_code("Enter"), 13);
        assert_eq!(key_code("ArrowDown"), 40);
        assert_eq!(key_code("a"), 'A' as i64);
    }
}
