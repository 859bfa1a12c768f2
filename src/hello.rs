//! Liveness function answering every method with a fixed greeting.

use crate::function::{EdgeError, FunctionContext};
use crate::http::{EdgeRequest, EdgeResponse, StatusCode};
use crate::rts::response::with_cors;
use rts_edge_macro::edge_function;
use serde_json::json;

#[edge_function(
    id = "hello",
    method = "GET",
    path = "/api/hello",
    description = "Returns a fixed greeting"
)]
pub async fn hello(
    _request: EdgeRequest,
    _ctx: &FunctionContext,
) -> Result<EdgeResponse, EdgeError> {
    let response = EdgeResponse::json(StatusCode::OK, &json!({ "message": "hello world" }))?;
    Ok(with_cors(response))
}
