//! worker_fetch tool implementation.
//!
//! Runs a request through the worker's interception boundary. Requests the
//! worker does not intercept go to the network unmodified.

use mylore_client::{FetchRequest, Fetcher, LifecycleController, Method, WorkerResponse};
use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Input parameters for worker_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerFetchParams {
    /// Absolute URL of the intercepted request.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for worker_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerFetchOutput {
    /// Canonical URL the request was keyed under.
    pub url: String,
    pub method: String,
    pub status: u16,
    /// "cache", "network", "offline" or "pass_through".
    pub source: String,
    pub content_type: Option<String>,
    /// Body decoded as UTF-8, lossy.
    pub body: String,
    pub bytes: usize,
}

/// Implementation of the worker_fetch tool.
pub async fn fetch_impl(
    controller: &LifecycleController, fetcher: &dyn Fetcher, params: WorkerFetchParams,
) -> Result<CallToolResult, McpError> {
    if params.url.is_empty() {
        return Err(ToolError::InvalidInput("url cannot be empty".into()).into());
    }
    let method = Method::from_bytes(params.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ToolError::InvalidInput(format!("unsupported method: {}", params.method)))?;
    let request = FetchRequest::parse(method, &params.url)?;

    let (response, source) = match controller.handle_fetch(&request).await {
        Some(response) => {
            let source = response.source.as_str();
            (response, source)
        }
        None => {
            tracing::debug!(url = %request.url, method = %request.method, "not intercepted, passing through");
            (WorkerResponse::from(fetcher.fetch(&request).await?), "pass_through")
        }
    };

    let output = WorkerFetchOutput {
        url: request.url.to_string(),
        method: request.method.to_string(),
        status: response.status.as_u16(),
        source: source.to_string(),
        content_type: response.content_type().map(str::to_string),
        body: String::from_utf8_lossy(&response.body).into_owned(),
        bytes: response.body.len(),
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| ToolError::InvalidInput(format!("Failed to serialize response: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{active_controller, json};

    fn params(method: &str, url: &str) -> WorkerFetchParams {
        WorkerFetchParams { url: url.to_string(), method: method.to_string() }
    }

    #[tokio::test]
    async fn test_manifest_asset_served_from_cache() {
        let (controller, fetcher, _db) = active_controller().await;
        let result = fetch_impl(&controller, fetcher.as_ref(), params("GET", "https://lore.example/MyLore/index.html"))
            .await
            .unwrap();

        let output = json(&result);
        assert_eq!(output["status"], 200);
        assert_eq!(output["source"], "cache");
        assert_eq!(output["body"], "https://lore.example/MyLore/index.html");
    }

    #[tokio::test]
    async fn test_post_passes_through() {
        let (controller, fetcher, _db) = active_controller().await;
        let result =
            fetch_impl(&controller, fetcher.as_ref(), params("post", "https://lore.example/api")).await.unwrap();

        let output = json(&result);
        assert_eq!(output["method"], "POST");
        assert_eq!(output["source"], "pass_through");
    }

    #[tokio::test]
    async fn test_unreachable_page_is_offline() {
        let (controller, fetcher, _db) = active_controller().await;
        let result = fetch_impl(&controller, fetcher.as_ref(), params("GET", "https://lore.example/down/page"))
            .await
            .unwrap();

        let output = json(&result);
        assert_eq!(output["status"], 503);
        assert_eq!(output["source"], "offline");
        assert_eq!(output["body"], "Offline");
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let (controller, fetcher, _db) = active_controller().await;
        assert!(fetch_impl(&controller, fetcher.as_ref(), params("GET", "")).await.is_err());
        assert!(fetch_impl(&controller, fetcher.as_ref(), params("GET", "ftp://lore.example/x")).await.is_err());
        assert!(fetch_impl(&controller, fetcher.as_ref(), params("BAD METHOD", "https://lore.example/")).await.is_err());
    }
}
