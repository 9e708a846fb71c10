//! Session export/import: cookies plus local storage, transported verbatim.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{evaluate, js_string, page_channel, str_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

pub fn export_session(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let root = state
            .host
            .root_channel()
            .await
            .ok_or_else(|| ToolError::raised("no live browser connection"))?;
        let cookies = root
            .send("Storage.getCookies", json!({}))
            .await?
            .get("cookies")
            .cloned()
            .unwrap_or_else(|| json!([]));

        let (record, channel) = page_channel(&state, &args).await?;
        let local_storage = evaluate(
            &channel,
            "(() => { const items = {}; \
             for (let i = 0; i < localStorage.length; i++) { \
               const key = localStorage.key(i); items[key] = localStorage.getItem(key); } \
             return { origin: location.origin, items }; })()",
        )
        .await?;

        let bundle = json!({
            "cookies": cookies,
            "local_storage": local_storage,
        });

        if let Some(path) = str_arg(&args, "path") {
            let body = serde_json::to_string_pretty(&bundle)
                .map_err(|err| ToolError::raised(format!("serialization failed: {err}")))?;
            tokio::fs::write(path, body)
                .await
                .map_err(|err| ToolError::raised(format!("could not write {path}: {err}")))?;
        }

        let cookie_count = bundle["cookies"].as_array().map(Vec::len).unwrap_or(0);
        Ok(json!({
            "target_id": record.id,
            "cookie_count": cookie_count,
            "session": bundle,
        }))
    })
}

pub fn import_session(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let bundle: Value = match (args.get("session"), str_arg(&args, "path")) {
            (Some(session), _) => session.clone(),
            (None, Some(path)) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|err| ToolError::raised(format!("could not read {path}: {err}")))?;
                serde_json::from_str(&raw)
                    .map_err(|err| ToolError::invalid_args(format!("malformed session file: {err}")))?
            }
            (None, None) => {
                return Err(ToolError::invalid_args(
                    "provide either session (object) or path (file)",
                ));
            }
        };

        let root = state
            .host
            .root_channel()
            .await
            .ok_or_else(|| ToolError::raised("no live browser connection"))?;

        let cookies = bundle.get("cookies").cloned().unwrap_or_else(|| json!([]));
        let cookie_count = cookies.as_array().map(Vec::len).unwrap_or(0);
        if cookie_count > 0 {
            root.send("Storage.setCookies", json!({ "cookies": cookies }))
                .await?;
        }

        // local storage is origin-scoped: only restore onto a matching page
        let mut restored_storage = 0;
        let mut skipped_origin = None;
        if let Some(storage) = bundle.get("local_storage") {
            let wanted_origin = storage
                .get("origin")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let items = storage
                .get("items")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if !items.is_empty() {
                let (_, channel) = page_channel(&state, &args).await?;
                let current = evaluate(&channel, "location.origin").await?;
                if current.as_str() == Some(wanted_origin.as_str()) {
                    for (key, value) in items {
                        let value = value.as_str().unwrap_or_default();
                        let expr = format!(
                            "localStorage.setItem({}, {})",
                            js_string(&key),
                            js_string(value)
                        );
                        evaluate(&channel, &expr).await?;
                        restored_storage += 1;
                    }
                } else {
                    skipped_origin = Some(wanted_origin);
                }
            }
        }

        Ok(json!({
            "cookies_restored": cookie_count,
            "storage_items_restored": restored_storage,
            "storage_skipped_for_origin": skipped_origin,
        }))
    })
}
