//! Body parsing and access-key resolution.

use super::error::RtsError;
use super::types::RtsRequest;
use crate::backend::Attributes;
use crate::http::EdgeRequest;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

/// Environment variable holding the backend access key.
pub const SDK_KEY_ENV: &str = "OPTIMIZELY_SDK_KEY";

pub const USER_ID_REQUIRED: &str = "userId is required";
pub const SDK_KEY_REQUIRED: &str =
    "SDK key is required (set OPTIMIZELY_SDK_KEY env var or include in request body)";

/// Where the configured access key comes from.
pub trait KeySource: Send + Sync {
    fn access_key(&self) -> Option<String>;
}

/// Reads the key from the process environment on every lookup.
#[derive(Debug, Clone)]
pub struct EnvKeySource {
    var: String,
}

impl EnvKeySource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeySource {
    fn default() -> Self {
        Self::new(SDK_KEY_ENV)
    }
}

impl KeySource for EnvKeySource {
    fn access_key(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

/// A key fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource(pub Option<String>);

impl StaticKeySource {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

impl KeySource for StaticKeySource {
    fn access_key(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    user_id: Option<String>,
    attributes: Option<Attributes>,
    sdk_key: Option<String>,
    flag_key: Option<String>,
}

#[derive(Clone)]
pub struct RequestValidator {
    keys: Arc<dyn KeySource>,
}

impl RequestValidator {
    pub fn new(keys: Arc<dyn KeySource>) -> Self {
        Self { keys }
    }

    /// Parse the JSON body and check the required fields.
    pub fn parse_and_validate(&self, request: &EdgeRequest) -> Result<RtsRequest, RtsError> {
        let raw: RawRequest = request.json().map_err(RtsError::Parse)?;
        debug!(
            "Request body parsed successfully: {}",
            request.text().unwrap_or_default()
        );

        let user_id = raw
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RtsError::Validation(USER_ID_REQUIRED.to_string()))?;

        Ok(RtsRequest {
            user_id,
            attributes: raw.attributes.unwrap_or_default(),
            sdk_key: raw.sdk_key.filter(|key| !key.is_empty()),
            flag_key: raw.flag_key.filter(|key| !key.is_empty()),
        })
    }

    /// The key supplied in the request wins; otherwise the configured one.
    pub fn resolve_access_key(&self, request: &RtsRequest) -> Result<String, RtsError> {
        if let Some(key) = &request.sdk_key {
            debug!(length = key.len(), "Using SDK key from request body");
            return Ok(key.clone());
        }

        let key = self.keys.access_key().filter(|key| !key.is_empty());
        debug!(
            exists = key.is_some(),
            length = key.as_ref().map_or(0, String::len),
            "SDK key check"
        );

        key.ok_or_else(|| {
            error!("{} not found in configuration", SDK_KEY_ENV);
            RtsError::Validation(SDK_KEY_REQUIRED.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use serde_json::json;

    fn validator(key: Option<&str>) -> RequestValidator {
        RequestValidator::new(Arc::new(StaticKeySource(key.map(str::to_string))))
    }

    fn post(body: &str) -> EdgeRequest {
        EdgeRequest::new(Method::Post, "/api/rts-test").body(body.to_string())
    }

    #[test]
    fn test_valid_request() {
        let request = validator(None)
            .parse_and_validate(&post(
                r#"{"userId":"u1","attributes":{"country":"US","age":30},"flagKey":"f1"}"#,
            ))
            .unwrap();
        assert_eq!(request.user_id, "u1");
        assert_eq!(request.attributes.get("age"), Some(&json!(30)));
        assert_eq!(request.flag_key.as_deref(), Some("f1"));
        assert_eq!(request.sdk_key, None);
    }

    #[test]
    fn test_user_id_required() {
        for body in [r#"{"userId":""}"#, r#"{"userId":null}"#, r#"{"attributes":{}}"#, "{}"] {
            let err = validator(None).parse_and_validate(&post(body)).unwrap_err();
            assert!(matches!(err, RtsError::Validation(_)), "body: {}", body);
            assert_eq!(err.to_string(), USER_ID_REQUIRED);
        }
    }

    #[test]
    fn test_invalid_json() {
        let err = validator(None)
            .parse_and_validate(&post("invalid json {"))
            .unwrap_err();
        assert!(matches!(err, RtsError::Parse(_)));
        assert!(err.to_string().starts_with("Failed to parse request body:"));
    }

    #[test]
    fn test_missing_body_is_a_parse_error() {
        let request = EdgeRequest::new(Method::Post, "/api/rts-test");
        let err = validator(None).parse_and_validate(&request).unwrap_err();
        assert!(matches!(err, RtsError::Parse(_)));
    }

    #[test]
    fn test_null_attributes_become_empty() {
        let request = validator(None)
            .parse_and_validate(&post(r#"{"userId":"u1","attributes":null}"#))
            .unwrap();
        assert!(request.attributes.is_empty());
    }

    #[test]
    fn test_request_key_preferred_over_configuration() {
        let request = RtsRequest::new("u1").with_sdk_key("from-body");
        assert_eq!(
            validator(Some("from-config")).resolve_access_key(&request).unwrap(),
            "from-body"
        );
        assert_eq!(
            validator(Some("from-config"))
                .resolve_access_key(&RtsRequest::new("u1"))
                .unwrap(),
            "from-config"
        );
    }

    #[test]
    fn test_missing_access_key() {
        for key in [None, Some("")] {
            let err = validator(key)
                .resolve_access_key(&RtsRequest::new("u1"))
                .unwrap_err();
            assert_eq!(err.to_string(), SDK_KEY_REQUIRED);
        }
    }

    #[test]
    fn test_env_key_source_reads_named_variable() {
        let source = EnvKeySource::new("RTS_EDGE_TEST_UNSET_VARIABLE");
        assert_eq!(source.access_key(), None);
    }
}
