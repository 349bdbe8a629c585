//! force_refresh tool implementation.

use std::sync::Arc;

use mylore_client::{LifecycleController, Page, UpdateCoordinator};
use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Output structure for force_refresh tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ForceRefreshOutput {
    /// Whether every generation was deleted.
    pub cleared: bool,
    /// Version installed after the refresh, if any.
    pub reinstalled: Option<String>,
    pub install_error: Option<String>,
}

/// Wipe every generation, unregister all versions, reload and install the
/// latest version from scratch.
pub async fn force_refresh_impl(
    controller: &Arc<LifecycleController>, page: Arc<dyn Page>,
) -> Result<CallToolResult, McpError> {
    let mut coordinator = UpdateCoordinator::connect(Arc::clone(controller), page).await;
    let cleared = coordinator.force_refresh().await;

    let (reinstalled, install_error) = match controller.update().await {
        Ok(worker) => (worker.map(|w| w.tag().to_string()), None),
        Err(e) => {
            tracing::error!(error = %e, "reinstall after force refresh failed");
            (None, Some(e.to_string()))
        }
    };
    controller.disconnect_client(coordinator.client()).await;

    let output = ForceRefreshOutput { cleared, reinstalled, install_error };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| ToolError::InvalidInput(format!("Failed to serialize refresh result: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::LogPage;
    use crate::tools::testing::{active_controller, json};
    use mylore_core::CachedResponse;

    #[tokio::test]
    async fn test_force_refresh_reinstalls_clean() {
        let (controller, _fetcher, db) = active_controller().await;
        let worker = controller.active_version().await.unwrap();
        let stale = CachedResponse::new("GET", "https://lore.example/api/lore", 200, Vec::new(), b"stale".to_vec());
        db.put_entry("v1-dynamic", &stale).await.unwrap();

        let result = force_refresh_impl(&controller, Arc::new(LogPage)).await.unwrap();
        let output = json(&result);
        assert_eq!(output["cleared"], true);
        assert_eq!(output["reinstalled"], "v1");
        assert!(output["install_error"].is_null());

        let active = controller.active_version().await.unwrap();
        assert_ne!(active.id(), worker.id());
        assert_eq!(db.generation_names().await.unwrap(), vec!["v1-critical"]);
        assert_eq!(controller.status().await.clients, 0);
    }
}
