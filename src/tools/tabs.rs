//! `manage_tabs`: tab enumeration and lifecycle via the HTTP endpoint.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{evaluate, page_channel, resolve_page, str_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

pub const ACTIONS: &[&str] = &["list", "new", "close", "activate", "get_url", "get_title"];

pub fn manage_tabs(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let action = str_arg(&args, "action")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: action"))?
            .to_string();
        let endpoint = state.host.endpoint().clone();
        let registry = state.host.registry();

        match action.as_str() {
            "list" => {
                if let Ok(list) = endpoint.list_targets().await {
                    registry.sync(&list);
                }
                let pages: Vec<Value> = registry
                    .pages()
                    .into_iter()
                    .map(|p| json!({ "target_id": p.id, "url": p.url, "title": p.title }))
                    .collect();
                Ok(json!({ "tabs": pages }))
            }
            "new" => {
                let url = str_arg(&args, "url").unwrap_or("about:blank");
                let created = endpoint.open_tab(url).await.map_err(ToolError::from)?;
                if let Ok(list) = endpoint.list_targets().await {
                    registry.sync(&list);
                }
                registry.mark_activated(&created.id);
                Ok(json!({ "target_id": created.id, "url": created.url }))
            }
            "close" => {
                let record = resolve_page(&state, &args)?;
                state.host.sessions().close_ephemeral(&record.id).await;
                endpoint
                    .close_tab(&record.id)
                    .await
                    .map_err(ToolError::from)?;
                Ok(json!({ "closed": record.id }))
            }
            "activate" => {
                let record = resolve_page(&state, &args)?;
                endpoint
                    .activate_tab(&record.id)
                    .await
                    .map_err(ToolError::from)?;
                registry.mark_activated(&record.id);
                Ok(json!({ "activated": record.id }))
            }
            "get_url" => {
                let (record, channel) = page_channel(&state, &args).await?;
                let url = evaluate(&channel, "window.location.href").await?;
                Ok(json!({ "target_id": record.id, "url": url }))
            }
            "get_title" => {
                let (record, channel) = page_channel(&state, &args).await?;
                let title = evaluate(&channel, "document.title").await?;
                Ok(json!({ "target_id": record.id, "title": title }))
            }
            other => Err(ToolError::invalid_args(format!(
                "unsupported action: {other}"
            ))),
        }
    })
}
