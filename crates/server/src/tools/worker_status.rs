//! worker_status tool implementation.

use mylore_client::{LifecycleController, WorkerStatus};
use mylore_core::{CacheDb, cache::Generation};
use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Output structure for worker_status tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerStatusOutput {
    /// Version controlling requests, if any.
    pub active: Option<WorkerStatus>,
    /// Version installing or waiting, if any.
    pub pending: Option<WorkerStatus>,
    pub clients: usize,
    /// Generations in creation order.
    pub generations: Vec<Generation>,
    pub total_bytes: u64,
}

/// Implementation of the worker_status tool.
pub async fn status_impl(controller: &LifecycleController, db: &CacheDb) -> Result<CallToolResult, McpError> {
    let status = controller.status().await;
    let output = WorkerStatusOutput {
        active: status.active,
        pending: status.pending,
        clients: status.clients,
        generations: db.generations().await?,
        total_bytes: db.total_size().await?,
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| ToolError::InvalidInput(format!("Failed to serialize status: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
