//! Control-channel tools: skip_waiting, clear_cache, get_cache_size.

use mylore_client::{ControlMessage, LifecycleController};
use rmcp::{ErrorData as McpError, model::*};

use crate::error::ToolError;

fn reply_json<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ToolError::InvalidInput(format!("Failed to serialize reply: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Activate the waiting version and report both slots afterwards.
pub async fn skip_waiting_impl(controller: &LifecycleController) -> Result<CallToolResult, McpError> {
    controller.skip_waiting().await?;
    reply_json(&controller.status().await)
}

/// Delete every generation. Replies `{"success": bool}`.
pub async fn clear_cache_impl(controller: &LifecycleController) -> Result<CallToolResult, McpError> {
    let reply = controller
        .post_message(ControlMessage::ClearCache)
        .await
        .ok_or_else(|| ToolError::NoReply("clear cache".into()))?;
    reply_json(&reply)
}

/// Total cached body size. Replies `{"size": n}`.
pub async fn get_cache_size_impl(controller: &LifecycleController) -> Result<CallToolResult, McpError> {
    let reply = controller
        .post_message(ControlMessage::GetCacheSize)
        .await
        .ok_or_else(|| ToolError::NoReply("cache size unavailable".into()))?;
    reply_json(&reply)
}
