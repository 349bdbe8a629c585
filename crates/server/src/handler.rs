//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the worker.
use std::sync::Arc;

use crate::tools::{
    WorkerFetchParams, clear_cache_impl, fetch_impl, force_refresh_impl, get_cache_size_impl, skip_waiting_impl,
    status_impl,
};
use crate::page::LogPage;

use mylore_client::{Fetcher, LifecycleController};
use mylore_core::CacheDb;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The MCP handler fronting one worker controller.
#[derive(Clone)]
pub struct WorkerServer {
    tool_router: ToolRouter<Self>,
    controller: Arc<LifecycleController>,
    fetcher: Arc<dyn Fetcher>,
    db: CacheDb,
}

/// Tool router implementation using the #[tool_router] macro.
#[tool_router]
impl WorkerServer {
    pub fn new(controller: Arc<LifecycleController>, fetcher: Arc<dyn Fetcher>, db: CacheDb) -> Self {
        Self { tool_router: Self::tool_router(), controller, fetcher, db }
    }

    #[tool(
        description = "Send a request through the offline worker. Returns status, body and whether it came from cache, network, the offline placeholder or passed through."
    )]
    async fn worker_fetch(&self, params: Parameters<WorkerFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.controller, self.fetcher.as_ref(), params.0).await
    }

    #[tool(description = "Activate the waiting worker version immediately and claim open clients.")]
    async fn skip_waiting(&self) -> Result<CallToolResult, McpError> {
        skip_waiting_impl(&self.controller).await
    }

    #[tool(description = "Delete every cache generation. Replies with a success flag.")]
    async fn clear_cache(&self) -> Result<CallToolResult, McpError> {
        clear_cache_impl(&self.controller).await
    }

    #[tool(
        description = "Clear every cache generation, unregister all worker versions, reload and reinstall the latest version."
    )]
    async fn force_refresh(&self) -> Result<CallToolResult, McpError> {
        force_refresh_impl(&self.controller, Arc::new(LogPage)).await
    }

    #[tool(description = "Total size in bytes of every cached response body.")]
    async fn get_cache_size(&self) -> Result<CallToolResult, McpError> {
        get_cache_size_impl(&self.controller).await
    }

    #[tool(description = "Active and waiting worker versions, connected clients and cache generations.")]
    async fn worker_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.controller, &self.db).await
    }
}

impl ServerHandler for WorkerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "mylore-worker".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
