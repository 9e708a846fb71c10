//! Script injection tools.

use std::sync::Arc;

use serde_json::json;

use super::{bool_arg, evaluate, page_channel, str_arg, HandlerFuture};
use crate::errors::ToolError;
use crate::schema::JsonMap;
use crate::state::AppState;

/// One-shot evaluation, or a persistent document-start registration when
/// `persistent` is set.
pub fn inject_script(state: Arc<AppState>, args: JsonMap) -> HandlerFuture {
    Box::pin(async move {
        let script = str_arg(&args, "script")
            .ok_or_else(|| ToolError::invalid_args("missing required argument: script"))?
            .to_string();
        let (record, channel) = page_channel(&state, &args).await?;

        if bool_arg(&args, "persistent") {
            let reply = channel
                .send(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({ "source": script, "runImmediately": true }),
                )
                .await?;
            let identifier = reply.get("identifier").cloned();
            Ok(json!({
                "target_id": record.id,
                "persistent": true,
                "script_id": identifier,
            }))
        } else {
            let result = evaluate(&channel, &script).await?;
            Ok(json!({
                "target_id": record.id,
                "persistent": false,
                "result": result,
            }))
        }
    })
}
