//! Errors raised by the tool layer itself.
//!
//! Worker errors convert through `mylore_core::Error`; these cover input
//! the tools reject before reaching the worker and replies that never came.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., an unknown HTTP method).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The worker handled the message but sent no reply.
    #[error("NO_REPLY: {0}")]
    NoReply(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let (code, message) = match &err {
            ToolError::InvalidInput(_) => (-32602, err.to_string()),
            ToolError::NoReply(_) => (-32000, err.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_codes() {
        let err: McpError = ToolError::InvalidInput("method FOO".into()).into();
        assert_eq!(err.code, ErrorCode(-32602));
        assert!(err.message.contains("INVALID_INPUT"));

        let err: McpError = ToolError::NoReply("cache size".into()).into();
        assert_eq!(err.code, ErrorCode(-32000));
    }
}
