//! Request and response payloads of the segment function.

use crate::backend::Attributes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A validated request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RtsRequest {
    pub user_id: String,
    pub attributes: Attributes,
    pub sdk_key: Option<String>,
    pub flag_key: Option<String>,
}

impl RtsRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            attributes: Attributes::new(),
            sdk_key: None,
            flag_key: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_flag_key(mut self, flag_key: impl Into<String>) -> Self {
        self.flag_key = Some(flag_key.into());
        self
    }

    pub fn with_sdk_key(mut self, sdk_key: impl Into<String>) -> Self {
        self.sdk_key = Some(sdk_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResult {
    pub variation_key: String,
    pub enabled: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub user_id: String,
    pub attributes: Attributes,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_result: Option<FlagResult>,
}

impl ResponseMetadata {
    /// Metadata echoing the request, stamped now.
    pub fn for_request(request: &RtsRequest) -> Self {
        Self {
            user_id: request.user_id.clone(),
            attributes: request.attributes.clone(),
            timestamp: timestamp(),
            flag_key: None,
            flag_result: None,
        }
    }

    /// Metadata for failures where the request is not known.
    pub fn unknown() -> Self {
        Self {
            user_id: "unknown".to_string(),
            attributes: Attributes::new(),
            timestamp: timestamp(),
            flag_key: None,
            flag_result: None,
        }
    }
}

/// The JSON envelope every response body uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_segments: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl ApiResponse {
    pub fn success(report: SegmentReport) -> Self {
        Self {
            success: true,
            qualified_segments: Some(report.qualified_segments),
            error: None,
            metadata: Some(report.metadata),
        }
    }

    pub fn failure(message: impl Into<String>, metadata: Option<ResponseMetadata>) -> Self {
        Self {
            success: false,
            qualified_segments: None,
            error: Some(message.into()),
            metadata,
        }
    }
}

/// Segments and metadata gathered for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReport {
    pub qualified_segments: Vec<String>,
    pub metadata: ResponseMetadata,
}

/// ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
