//! Edge function trait and its per-invocation context.

use crate::http::{EdgeRequest, EdgeResponse};
use async_trait::async_trait;

/// Per-invocation context handed to an edge function.
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    /// Name of the function being invoked.
    pub function_name: String,
    /// Request ID for tracing.
    pub request_id: String,
}

impl FunctionContext {
    pub fn new(function_name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            request_id: request_id.into(),
        }
    }
}

/// An HTTP handler deployed at the edge.
///
/// Implementations receive one request at a time and must not rely on state
/// surviving between invocations; anything expensive is built per request and
/// released before `fetch` returns.
#[async_trait]
pub trait EdgeFunction: Send + Sync {
    /// Handle an incoming HTTP request.
    async fn fetch(
        &self,
        request: EdgeRequest,
        ctx: &FunctionContext,
    ) -> Result<EdgeResponse, EdgeError>;

    /// Get the function name.
    fn name(&self) -> &str;
}

/// Error raised by the host or by a function that has no better response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct EdgeError {
    pub message: String,
    pub code: u16,
}

impl EdgeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(500, message)
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(404, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(400, message)
    }
}

impl From<EdgeError> for EdgeResponse {
    fn from(err: EdgeError) -> Self {
        EdgeResponse::error(err.code, err.message)
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        EdgeError::new(err.to_string())
    }
}
