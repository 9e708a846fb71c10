//! MCP surface: tool listing and dispatch over the stdio transport.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use tracing::debug;

use crate::catalog;
use crate::dispatch::dispatch;
use crate::schema;
use crate::state::AppState;

#[derive(Clone)]
pub struct ChromehandServer {
    state: Arc<AppState>,
}

impl ChromehandServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl ServerHandler for ChromehandServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Drives a real, user-owned Chromium browser over CDP. Call \
                 launch_with_profile first; browsers are never started implicitly. \
                 Advanced network tools appear after enable_advanced_tools."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools: Vec<Tool> = catalog::visible(self.state.advanced_enabled())
            .map(|spec| {
                Tool::new(
                    Cow::Borrowed(spec.name),
                    Cow::Borrowed(spec.description),
                    Arc::new(schema::json_schema(&spec.args)),
                )
            })
            .collect();
        debug!(target: "dispatcher", count = tools.len(), "tool list served");
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        let visible_before = self.state.advanced_enabled();

        let value = dispatch(self.state.clone(), &name, request.arguments).await;

        // visibility toggles are announced so the client refreshes its list
        if name == "enable_advanced_tools" && self.state.advanced_enabled() != visible_before {
            let _ = context.peer.notify_tool_list_changed().await;
        }

        let text = serde_json::to_string(&value)
            .map_err(|err| McpError::internal_error(err.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}
