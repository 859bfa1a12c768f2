//! Response builders for the segment function. Every response carries the
//! same CORS headers.

use super::error::RtsError;
use super::types::{ApiResponse, ResponseMetadata, SegmentReport};
use crate::http::{EdgeResponse, StatusCode};
use tracing::error;

pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Headers", "Content-Type"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
];

pub fn with_cors(response: EdgeResponse) -> EdgeResponse {
    CORS_HEADERS
        .iter()
        .fold(response, |response, (name, value)| response.header(*name, *value))
}

fn envelope(status: StatusCode, body: &ApiResponse) -> EdgeResponse {
    let response = EdgeResponse::json(status, body).unwrap_or_else(|e| {
        error!("Failed to serialize response body: {}", e);
        EdgeResponse::new(StatusCode::INTERNAL_SERVER_ERROR)
            .header("Content-Type", "application/json")
            .body(r#"{"success":false,"error":"Unknown error occurred"}"#)
    });
    with_cors(response)
}

pub fn success(report: SegmentReport) -> EdgeResponse {
    envelope(StatusCode::OK, &ApiResponse::success(report))
}

pub fn error(
    message: impl Into<String>,
    status: StatusCode,
    metadata: Option<ResponseMetadata>,
) -> EdgeResponse {
    envelope(status, &ApiResponse::failure(message, metadata))
}

/// Answer to an OPTIONS request: 200 with no body.
pub fn cors_preflight() -> EdgeResponse {
    with_cors(EdgeResponse::ok())
}

pub fn method_not_allowed() -> EdgeResponse {
    let err = RtsError::MethodNotAllowed;
    error(err.to_string(), err.status(), None)
}

pub fn validation_error(message: impl Into<String>) -> EdgeResponse {
    error(message, StatusCode::BAD_REQUEST, None)
}

pub fn from_error(err: &RtsError, metadata: Option<ResponseMetadata>) -> EdgeResponse {
    error(err.to_string(), err.status(), metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rts::types::RtsRequest;
    use serde_json::{json, Value};

    fn body(response: &EdgeResponse) -> Value {
        response.json_body().unwrap().unwrap()
    }

    fn assert_cors(response: &EdgeResponse) {
        for (name, value) in CORS_HEADERS {
            assert_eq!(response.get_header(name).map(String::as_str), Some(value));
        }
    }

    #[test]
    fn test_success_envelope() {
        let report = SegmentReport {
            qualified_segments: vec!["s1".to_string()],
            metadata: ResponseMetadata::for_request(&RtsRequest::new("u1")),
        };
        let response = success(report);

        assert_eq!(response.status, StatusCode::OK);
        assert_cors(&response);
        assert_eq!(
            response.get_header("content-type").map(String::as_str),
            Some("application/json")
        );
        let body = body(&response);
        assert_eq!(body["success"], true);
        assert_eq!(body["qualifiedSegments"], json!(["s1"]));
        assert_eq!(body["metadata"]["userId"], "u1");
        assert!(body.get("error").is_none());
    }

    #[test]
    fn test_preflight_has_no_body() {
        let response = cors_preflight();
        assert_eq!(response.status, StatusCode::OK);
        assert_cors(&response);
        assert!(response.body.is_none());
        assert!(response.get_header("Content-Type").is_none());
    }

    #[test]
    fn test_method_not_allowed() {
        let response = method_not_allowed();
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_cors(&response);
        assert_eq!(
            body(&response),
            json!({"success": false, "error": "Method not allowed. Use POST."})
        );
    }

    #[test]
    fn test_validation_error() {
        let response = validation_error("userId is required");
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body(&response),
            json!({"success": false, "error": "userId is required"})
        );
    }

    #[test]
    fn test_from_error_keeps_metadata() {
        let err = RtsError::Context("Failed to create user context".to_string());
        let response = from_error(&err, Some(ResponseMetadata::unknown()));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = body(&response);
        assert_eq!(body["error"], "Failed to create user context");
        assert_eq!(body["metadata"]["userId"], "unknown");
        assert!(body.get("qualifiedSegments").is_none());
    }
}
